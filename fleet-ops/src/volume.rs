use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
};

use crate::{
    cancel::Cancellation,
    errors::{Error, Result},
    provider::{AttachRequest, Ec2Provider, FleetInstance, VolumeRequest},
    readiness,
    request::ProvisionOptions,
};

/// A multi-attach volume can be attached to at most 16 Nitro instances.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/ebs-volumes-multi.html
pub const DEFAULT_ATTACH_CEILING: usize = 16;
pub const DEFAULT_IOPS: u32 = 100;
pub const DEFAULT_DEVICE: &str = "/dev/sdf";

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct VolumeOptions {
    /// Provisioned IOPS of each io2 volume.
    pub iops: u32,
    /// Device name the volume is exposed as on every instance.
    pub device: String,
    /// Maximum number of instances attached to one volume.
    pub attach_ceiling: usize,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            iops: DEFAULT_IOPS,
            device: String::from(DEFAULT_DEVICE),
            attach_ceiling: DEFAULT_ATTACH_CEILING,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Attachment {
    pub instance_id: String,
    pub volume_id: String,
    pub availability_zone: String,
    pub device: String,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct VolumeOutcome {
    /// Zone to all volume Ids created in the zone, in creation order.
    pub volumes: BTreeMap<String, Vec<String>>,
    /// In fleet instance order.
    pub attachments: Vec<Attachment>,
}

/// Creates one multi-attach io2 volume. Returns None on a dry-run signal.
pub async fn create_volume<P: Ec2Provider + ?Sized>(
    provider: &P,
    availability_zone: &str,
    size_gib: u32,
    iops: u32,
    dry_run: bool,
) -> Result<Option<String>> {
    let req = VolumeRequest {
        availability_zone: availability_zone.to_string(),
        size_gib,
        iops,
        dry_run,
    };
    log::info!(
        "creating {} GiB multi-attach volume in '{}' (iops {}, dry-run {})",
        size_gib,
        availability_zone,
        iops,
        dry_run
    );
    match provider.create_volume(&req).await {
        Ok(volume_id) => {
            log::info!("created volume '{}' in '{}'", volume_id, availability_zone);
            Ok(Some(volume_id))
        }
        Err(e) if e.is_dry_run() => {
            log::info!("dry-run create volume in '{}' succeeded", availability_zone);
            Ok(None)
        }
        Err(e) => {
            log::error!("failed to create volume in '{}': {}", availability_zone, e);
            Err(e)
        }
    }
}

/// Current shared volume of a zone and how many more instances it takes.
#[derive(Debug)]
pub struct VolumeSlot {
    pub zone: String,
    pub volume_id: Option<String>,
    pub remaining: usize,
    pub volumes: Vec<String>,

    size_gib: u32,
    options: VolumeOptions,
    dry_run: bool,
}

impl VolumeSlot {
    /// Creates the first volume of the zone.
    pub async fn new<P: Ec2Provider + ?Sized>(
        provider: &P,
        zone: &str,
        size_gib: u32,
        options: &VolumeOptions,
        dry_run: bool,
    ) -> Result<Self> {
        let volume_id = create_volume(provider, zone, size_gib, options.iops, dry_run).await?;
        Ok(Self {
            zone: zone.to_string(),
            volumes: volume_id.iter().cloned().collect(),
            volume_id,
            remaining: options.attach_ceiling,
            size_gib,
            options: options.clone(),
            dry_run,
        })
    }

    /// Attaches the current volume to the instance, first replacing the
    /// volume if it already reached the attach ceiling.
    /// Rollover is lazy: the replacement is created by the attach that needs
    /// it (the 17th with the default ceiling), not right after the 16th, so a
    /// zone with exactly 16 instances never gets an unused second volume.
    /// Returns None if there is no real volume to attach (dry-run).
    pub async fn attach<P: Ec2Provider + ?Sized>(
        &mut self,
        provider: &P,
        instance_id: &str,
    ) -> Result<Option<Attachment>> {
        if self.remaining == 0 {
            log::info!(
                "volume {:?} in '{}' reached {} attachment(s), creating a new one",
                self.volume_id,
                self.zone,
                self.options.attach_ceiling
            );
            self.volume_id = create_volume(
                provider,
                &self.zone,
                self.size_gib,
                self.options.iops,
                self.dry_run,
            )
            .await?;
            if let Some(id) = &self.volume_id {
                self.volumes.push(id.clone());
            }
            self.remaining = self.options.attach_ceiling;
        }

        let volume_id = match &self.volume_id {
            Some(id) => id.clone(),
            None => {
                log::info!(
                    "no volume in '{}' (dry-run), skipping attach for '{}'",
                    self.zone,
                    instance_id
                );
                return Ok(None);
            }
        };

        let req = AttachRequest {
            volume_id: volume_id.clone(),
            instance_id: instance_id.to_string(),
            device: self.options.device.clone(),
            dry_run: self.dry_run,
        };
        log::info!(
            "attaching volume '{}' to '{}' in '{}' as '{}'",
            volume_id,
            instance_id,
            self.zone,
            req.device
        );
        match provider.attach_volume(&req).await {
            Ok(_) => {}
            Err(e) if e.is_dry_run() => {
                log::info!("dry-run attach volume '{}' succeeded", volume_id);
                return Ok(None);
            }
            Err(e) => {
                log::error!(
                    "failed to attach volume '{}' to '{}': {}",
                    volume_id,
                    instance_id,
                    e
                );
                return Err(e);
            }
        }
        self.remaining -= 1;
        log::info!(
            "attached volume '{}' to '{}' ({} attachment(s) left)",
            volume_id,
            instance_id,
            self.remaining
        );

        Ok(Some(Attachment {
            instance_id: instance_id.to_string(),
            volume_id,
            availability_zone: self.zone.clone(),
            device: req.device,
        }))
    }
}

/// Creates one volume per zone and attaches the zone's volume to each
/// fleet instance after an advisory readiness wait, rolling over to a new
/// volume whenever the attach ceiling is reached.
///
/// Instances wait for readiness concurrently (up to "concurrency" at a time),
/// while each zone slot is mutated by one task at a time.
/// The first volume/attach error stops new attaches; nothing is rolled back.
pub async fn provision_and_attach<P: Ec2Provider + ?Sized + 'static>(
    provider: Arc<P>,
    instances: &[FleetInstance],
    size_gib: u32,
    zones: &[String; 2],
    opts: &ProvisionOptions,
    dry_run: bool,
    cancel: &Cancellation,
) -> Result<VolumeOutcome> {
    let options = &opts.volume;
    let poll = &opts.poll;
    let concurrency = opts.concurrency;
    let total = instances.len();
    log::info!(
        "provisioning volumes for {} instance(s) across {:?} (ceiling {}, concurrency {})",
        total,
        zones,
        options.attach_ceiling,
        concurrency
    );

    let (slot_a, slot_b) = match tokio::try_join!(
        VolumeSlot::new(&*provider, &zones[0], size_gib, options, dry_run),
        VolumeSlot::new(&*provider, &zones[1], size_gib, options, dry_run),
    ) {
        Ok(slots) => slots,
        Err(e) => {
            return Err(Error::PartialProvisioningFailure {
                attached: 0,
                pending: total,
                cause: Box::new(e),
            })
        }
    };
    let slots: HashMap<String, Arc<Mutex<VolumeSlot>>> = [slot_a, slot_b]
        .into_iter()
        .map(|s| (s.zone.clone(), Arc::new(Mutex::new(s))))
        .collect();

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let aborted = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for (index, instance) in instances.iter().enumerate() {
        if aborted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }
        let slot = match slots.get(&instance.availability_zone) {
            Some(slot) => Arc::clone(slot),
            None => {
                log::warn!(
                    "instance '{}' is in unknown zone '{}', skipping",
                    instance.instance_id,
                    instance.availability_zone
                );
                continue;
            }
        };
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(p) => p,
            Err(e) => {
                return Err(Error::Other {
                    message: format!("failed to acquire attach permit {}", e),
                })
            }
        };
        if aborted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }

        let provider = Arc::clone(&provider);
        let aborted = Arc::clone(&aborted);
        let instance_id = instance.instance_id.clone();
        let poll = poll.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match readiness::await_running(&*provider, &instance_id, &poll, &cancel).await {
                Ok(_) => {}
                Err(Error::Timeout { message }) => {
                    log::warn!("{}, attaching anyway", message);
                }
                Err(e) => return (index, Err(e)),
            }
            if aborted.load(Ordering::SeqCst) {
                return (index, Ok(None));
            }

            let mut slot = slot.lock().await;
            if aborted.load(Ordering::SeqCst) {
                return (index, Ok(None));
            }
            let ret = slot.attach(&*provider, &instance_id).await;
            if ret.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            (index, ret)
        });
    }

    let mut attachments: Vec<(usize, Attachment)> = Vec::new();
    let mut first_err: Option<Error> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(Some(attachment)))) => attachments.push((index, attachment)),
            Ok((_, Ok(None))) => {}
            Ok((_, Err(e))) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(Error::Other {
                        message: format!("attach task failed {}", e),
                    });
                }
            }
        }
    }
    attachments.sort_by_key(|(index, _)| *index);
    let attachments: Vec<Attachment> = attachments.into_iter().map(|(_, a)| a).collect();

    if cancel.is_cancelled() {
        log::warn!(
            "cancelled after attaching {} of {} instance(s)",
            attachments.len(),
            total
        );
        return Err(Error::Cancelled);
    }
    if let Some(e) = first_err {
        return Err(Error::PartialProvisioningFailure {
            attached: attachments.len(),
            pending: total - attachments.len(),
            cause: Box::new(e),
        });
    }

    let mut volumes = BTreeMap::new();
    for slot in slots.values() {
        let slot = slot.lock().await;
        volumes.insert(slot.zone.clone(), slot.volumes.clone());
    }
    log::info!(
        "attached {} of {} instance(s), volumes {:?}",
        attachments.len(),
        total,
        volumes
    );

    Ok(VolumeOutcome {
        volumes,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::Duration;

    use super::*;
    use crate::{
        readiness::PollPolicy,
        testing::{Call, MockProvider},
    };

    fn zones() -> [String; 2] {
        [String::from("A"), String::from("B")]
    }

    fn instances(n_a: usize, n_b: usize) -> Vec<FleetInstance> {
        let mut v = Vec::new();
        for i in 0..n_a {
            v.push(FleetInstance {
                instance_id: format!("i-a{:02}", i),
                availability_zone: String::from("A"),
            });
        }
        for i in 0..n_b {
            v.push(FleetInstance {
                instance_id: format!("i-b{:02}", i),
                availability_zone: String::from("B"),
            });
        }
        v
    }

    fn fast_opts(volume: VolumeOptions, concurrency: usize) -> ProvisionOptions {
        ProvisionOptions {
            poll: PollPolicy {
                attempts: 2,
                interval: Duration::from_millis(1),
                jitter: Duration::ZERO,
                timeout: None,
            },
            volume,
            concurrency,
        }
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_slot_rollover --exact --show-output
    #[tokio::test]
    async fn test_slot_rollover() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = MockProvider::new();
        let opts = VolumeOptions::default();
        let mut slot = VolumeSlot::new(&provider, "A", 4, &opts, false)
            .await
            .unwrap();
        let first = slot.volume_id.clone().unwrap();
        assert_eq!(slot.remaining, 16);

        for i in 0..16 {
            let a = slot.attach(&provider, &format!("i-{}", i)).await.unwrap().unwrap();
            assert_eq!(a.volume_id, first);
            assert_eq!(a.device, "/dev/sdf");
        }
        assert_eq!(slot.remaining, 0);
        // no new volume until it is needed
        assert_eq!(slot.volumes.len(), 1);
        assert_eq!(provider.count(|c| matches!(c, Call::CreateVolume(_))), 1);

        let a = slot.attach(&provider, "i-16").await.unwrap().unwrap();
        assert_ne!(a.volume_id, first);
        assert_eq!(slot.remaining, 15);
        assert_eq!(slot.volumes.len(), 2);
        assert_eq!(provider.count(|c| matches!(c, Call::CreateVolume(_))), 2);
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_provision_and_attach --exact --show-output
    #[tokio::test]
    async fn test_provision_and_attach() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let instances = instances(2, 2);
        let outcome = provision_and_attach(
            Arc::clone(&provider),
            &instances,
            4,
            &zones(),
            &fast_opts(VolumeOptions::default(), 1),
            false,
            &Cancellation::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.volumes.len(), 2);
        assert_eq!(outcome.volumes["A"].len(), 1);
        assert_eq!(outcome.volumes["B"].len(), 1);
        assert_eq!(outcome.attachments.len(), 4);
        for a in outcome.attachments.iter() {
            assert_eq!(outcome.volumes[&a.availability_zone][0], a.volume_id);
        }
        let ids: Vec<&str> = outcome
            .attachments
            .iter()
            .map(|a| a.instance_id.as_str())
            .collect();
        assert_eq!(ids, vec!["i-a00", "i-a01", "i-b00", "i-b01"]);

        // sequential: readiness check precedes each attach
        let calls = provider.calls();
        let sequence: Vec<&Call> = calls
            .iter()
            .filter(|c| !matches!(c, Call::CreateVolume(_)))
            .collect();
        assert_eq!(sequence.len(), 8);
        for pair in sequence.chunks(2) {
            match (pair[0], pair[1]) {
                (Call::DescribeInstance(i1), Call::AttachVolume(_, i2)) => assert_eq!(i1, i2),
                other => panic!("unexpected call order {:?}", other),
            }
        }
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_ceiling_concurrent --exact --show-output
    #[tokio::test]
    async fn test_ceiling_concurrent() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new().with_pending_polls(1));
        let instances = instances(35, 16);
        let outcome = provision_and_attach(
            Arc::clone(&provider),
            &instances,
            4,
            &zones(),
            &fast_opts(VolumeOptions::default(), 8),
            false,
            &Cancellation::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.attachments.len(), 51);
        assert_eq!(outcome.volumes["A"].len(), 3);
        assert_eq!(outcome.volumes["B"].len(), 1);

        let mut per_volume: HashMap<String, usize> = HashMap::new();
        for a in outcome.attachments.iter() {
            *per_volume.entry(a.volume_id.clone()).or_insert(0) += 1;
        }
        assert!(per_volume.values().all(|n| *n <= DEFAULT_ATTACH_CEILING));
        assert_eq!(per_volume[&outcome.volumes["A"][2]], 3);
        assert_eq!(per_volume[&outcome.volumes["B"][0]], 16);
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_attach_failure --exact --show-output
    #[tokio::test]
    async fn test_attach_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(
            MockProvider::new().with_attach_error("i-a02", Error::provider("IncorrectState", "not running")),
        );
        let instances = instances(5, 0);
        let ret = provision_and_attach(
            Arc::clone(&provider),
            &instances,
            4,
            &zones(),
            &fast_opts(VolumeOptions::default(), 1),
            false,
            &Cancellation::new(),
        )
        .await;

        match ret {
            Err(Error::PartialProvisioningFailure {
                attached,
                pending,
                cause,
            }) => {
                assert_eq!(attached, 2);
                assert_eq!(pending, 3);
                assert_eq!(cause.code(), Some("IncorrectState"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // no attach attempted after the failure, nothing detached
        let attached: Vec<String> = provider.attachments().into_iter().map(|(_, i)| i).collect();
        assert_eq!(attached, vec!["i-a00", "i-a01", "i-a02"]);
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_rollover_failure --exact --show-output
    #[tokio::test]
    async fn test_rollover_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        // two initial volumes succeed, the rollover volume fails
        let provider = Arc::new(
            MockProvider::new().with_create_volume_error_at(2, Error::provider("VolumeLimitExceeded", "limit")),
        );
        let opts = VolumeOptions {
            attach_ceiling: 2,
            ..VolumeOptions::default()
        };
        let ret = provision_and_attach(
            Arc::clone(&provider),
            &instances(4, 0),
            4,
            &zones(),
            &fast_opts(opts, 1),
            false,
            &Cancellation::new(),
        )
        .await;
        match ret {
            Err(Error::PartialProvisioningFailure {
                attached, cause, ..
            }) => {
                assert_eq!(attached, 2);
                assert_eq!(cause.code(), Some("VolumeLimitExceeded"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(provider.attachments().len(), 2);

        // initial volume failure attaches nothing
        let provider = Arc::new(
            MockProvider::new().with_create_volume_error_at(0, Error::provider("VolumeLimitExceeded", "limit")),
        );
        let ret = provision_and_attach(
            Arc::clone(&provider),
            &instances(1, 1),
            4,
            &zones(),
            &fast_opts(VolumeOptions::default(), 1),
            false,
            &Cancellation::new(),
        )
        .await;
        assert!(matches!(
            ret,
            Err(Error::PartialProvisioningFailure {
                attached: 0,
                pending: 2,
                ..
            })
        ));
        assert!(provider.attachments().is_empty());
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- volume::tests::test_dry_run --exact --show-output
    #[tokio::test]
    async fn test_dry_run() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let outcome = provision_and_attach(
            Arc::clone(&provider),
            &instances(1, 1),
            4,
            &zones(),
            &fast_opts(VolumeOptions::default(), 1),
            true,
            &Cancellation::new(),
        )
        .await
        .unwrap();
        assert!(outcome.attachments.is_empty());
        assert!(outcome.volumes.values().all(|v| v.is_empty()));
        assert!(provider.attachments().is_empty());
    }
}
