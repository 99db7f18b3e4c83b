use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    provider::{Ec2Provider, LaunchTemplateRequest},
};

/// Launch template owned by a single provisioning run.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct LaunchTemplate {
    pub name: String,
    /// None if created in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Creates the launch template the fleet request refers to.
/// A dry-run signal returns a template without Id; any other provider
/// error is fatal to the run.
pub async fn create<P: Ec2Provider + ?Sized>(
    provider: &P,
    name: &str,
    image_id: &str,
    default_instance_type: &str,
    security_group_ids: &[String],
    dry_run: bool,
) -> Result<LaunchTemplate> {
    let req = LaunchTemplateRequest {
        name: name.to_string(),
        image_id: image_id.to_string(),
        default_instance_type: default_instance_type.to_string(),
        security_group_ids: security_group_ids.to_vec(),
        dry_run,
    };
    log::info!(
        "creating launch template '{}' (image '{}', instance type '{}', security groups {:?}, dry-run {})",
        req.name,
        req.image_id,
        req.default_instance_type,
        req.security_group_ids,
        dry_run
    );

    match provider.create_launch_template(&req).await {
        Ok(id) => {
            log::info!("created launch template '{}' ({})", name, id);
            Ok(LaunchTemplate {
                name: name.to_string(),
                id: Some(id),
            })
        }
        Err(e) if e.is_dry_run() => {
            log::info!("dry-run create launch template '{}' succeeded", name);
            Ok(LaunchTemplate {
                name: name.to_string(),
                id: None,
            })
        }
        Err(e) => {
            log::error!("failed to create launch template '{}': {}", name, e);
            Err(e)
        }
    }
}

/// Best-effort delete; failures only leave an orphaned template behind
/// and are never returned.
pub async fn delete<P: Ec2Provider + ?Sized>(
    provider: &P,
    template: &LaunchTemplate,
    dry_run: bool,
) {
    log::info!(
        "deleting launch template '{}' ({:?})",
        template.name,
        template.id
    );
    match provider
        .delete_launch_template(template.id.as_deref(), &template.name, dry_run)
        .await
    {
        Ok(_) => log::info!("deleted launch template '{}'", template.name),
        Err(e) if e.is_dry_run() => {
            log::info!("dry-run delete launch template '{}' succeeded", template.name)
        }
        Err(e) => log::warn!(
            "failed to delete launch template '{}' ({:?}), must be deleted manually: {}",
            template.name,
            template.id,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::Error,
        testing::{Call, MockProvider},
    };

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- template::tests::test_create_delete --exact --show-output
    #[tokio::test]
    async fn test_create_delete() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = MockProvider::new();
        let sgs = vec![String::from("sg-1"), String::from("sg-2")];
        let lt = create(&provider, "lt", "ami-1", "t3.micro", &sgs, false)
            .await
            .unwrap();
        assert_eq!(lt.id.as_deref(), Some("lt-0123456789"));

        delete(&provider, &lt, false).await;
        assert_eq!(
            provider.calls(),
            vec![
                Call::CreateLaunchTemplate(String::from("lt")),
                Call::DeleteLaunchTemplate(Some(String::from("lt-0123456789")), String::from("lt")),
            ]
        );
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- template::tests::test_dry_run --exact --show-output
    #[tokio::test]
    async fn test_dry_run() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = MockProvider::new();
        let lt = create(&provider, "lt", "ami-1", "t3.micro", &[], true)
            .await
            .unwrap();
        assert_eq!(lt.id, None);

        // deletes by name
        delete(&provider, &lt, true).await;
        assert_eq!(
            provider.calls()[1],
            Call::DeleteLaunchTemplate(None, String::from("lt"))
        );
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- template::tests::test_errors --exact --show-output
    #[tokio::test]
    async fn test_errors() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = MockProvider::new()
            .with_create_template_error(Error::provider("UnauthorizedOperation", "denied"));
        let ret = create(&provider, "lt", "ami-1", "t3.micro", &[], false).await;
        assert_eq!(ret.unwrap_err().code(), Some("UnauthorizedOperation"));

        // delete failure is swallowed
        let provider = MockProvider::new()
            .with_delete_template_error(Error::provider("InternalError", "oops"));
        let lt = LaunchTemplate {
            name: String::from("lt"),
            id: Some(String::from("lt-1")),
        };
        delete(&provider, &lt, false).await;
        assert_eq!(provider.calls().len(), 1);
    }
}
