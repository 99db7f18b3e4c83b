use serde::{Deserialize, Serialize};

/// On-demand vs spot target capacity of a fleet.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub struct CapacitySplit {
    pub on_demand: usize,
    pub spot: usize,
}

impl CapacitySplit {
    /// Rounds the on-demand share down, the remainder goes to spot.
    pub fn new(node_count: usize, on_demand_percentage: u32) -> Self {
        let pct = on_demand_percentage.min(100) as usize;
        let on_demand = pct * node_count / 100;
        Self {
            on_demand,
            spot: node_count - on_demand,
        }
    }

    pub fn total(&self) -> usize {
        self.on_demand + self.spot
    }
}

/// Returns the zone of the instance index: the first "node_count / 2"
/// indexes go to the first zone, the rest (including any remainder)
/// to the second zone.
pub fn zone_of<'a>(index: usize, node_count: usize, zones: &'a [String; 2]) -> &'a str {
    if index < node_count / 2 {
        &zones[0]
    } else {
        &zones[1]
    }
}

/// Assigns each instance index to a zone and splits the capacity.
pub fn plan(
    node_count: usize,
    zones: &[String; 2],
    on_demand_percentage: u32,
) -> (Vec<String>, CapacitySplit) {
    let assignment = (0..node_count)
        .map(|i| zone_of(i, node_count, zones).to_string())
        .collect();
    let split = CapacitySplit::new(node_count, on_demand_percentage);
    log::info!(
        "planned {} node(s): {} in '{}', {} in '{}', {} on-demand, {} spot",
        node_count,
        node_count / 2,
        zones[0],
        node_count - node_count / 2,
        zones[1],
        split.on_demand,
        split.spot
    );
    (assignment, split)
}

#[cfg(test)]
fn test_zones() -> [String; 2] {
    [String::from("A"), String::from("B")]
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- placement::test_capacity_split --exact --show-output
#[test]
fn test_capacity_split() {
    let _ = env_logger::builder().is_test(true).try_init();

    for n in 0..=64 {
        for pct in 0..=100 {
            let split = CapacitySplit::new(n, pct);
            assert_eq!(split.total(), n);
            assert_eq!(split.on_demand, (pct as usize * n) / 100);
        }
    }

    assert_eq!(
        CapacitySplit::new(4, 20),
        CapacitySplit {
            on_demand: 0,
            spot: 4
        }
    );
    assert_eq!(
        CapacitySplit::new(10, 20),
        CapacitySplit {
            on_demand: 2,
            spot: 8
        }
    );
    assert_eq!(CapacitySplit::new(7, 100).spot, 0);
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- placement::test_plan --exact --show-output
#[test]
fn test_plan() {
    let _ = env_logger::builder().is_test(true).try_init();

    let zones = test_zones();
    let (assignment, split) = plan(4, &zones, 20);
    assert_eq!(assignment, vec!["A", "A", "B", "B"]);
    assert_eq!(split, CapacitySplit { on_demand: 0, spot: 4 });

    // remainder goes to the second zone
    let (assignment, _) = plan(5, &zones, 20);
    assert_eq!(assignment, vec!["A", "A", "B", "B", "B"]);

    let (assignment, _) = plan(1, &zones, 0);
    assert_eq!(assignment, vec!["B"]);

    for n in 0..=33 {
        let (assignment, _) = plan(n, &zones, 50);
        assert_eq!(assignment.len(), n);

        // two contiguous ranges
        let first_b = assignment.iter().position(|z| z == "B").unwrap_or(n);
        assert_eq!(first_b, n / 2);
        assert!(assignment[..first_b].iter().all(|z| z == "A"));
        assert!(assignment[first_b..].iter().all(|z| z == "B"));

        // deterministic
        assert_eq!(plan(n, &zones, 50).0, assignment);
    }
}
