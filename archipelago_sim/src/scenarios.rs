//! Clustering scenarios for the harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// ARC-001: Three static peers, two islands
    ThreePeers,

    /// ARC-002: Scattered groups converge on one square
    FlashMob,

    /// ARC-003: One crowd disperses in all directions
    Dispersal,

    /// ARC-004: Peers drop offline and expire by heartbeat
    Churn,

    /// ARC-005: Transports connect and disconnect mid-run
    TransportShuffle,

    /// ARC-006: Distances are tightened mid-run
    OptionsShift,

    /// ARC-007: Groups ask for a specific island
    PreferredIsland,

    // ═══════════════════════════════════════════════════
    // STRESS SCENARIOS
    // ═══════════════════════════════════════════════════

    /// ARC-008: Tiny islands under heavy motion
    CapacityCrunch,

    /// ARC-009: Large crowd with continuous churn
    Stampede,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        let mut all = Self::standard();
        all.extend(Self::stress());
        all
    }

    /// Returns standard scenarios.
    pub fn standard() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ThreePeers,
            ScenarioId::FlashMob,
            ScenarioId::Dispersal,
            ScenarioId::Churn,
            ScenarioId::TransportShuffle,
            ScenarioId::OptionsShift,
            ScenarioId::PreferredIsland,
        ]
    }

    /// Returns stress scenarios only.
    pub fn stress() -> Vec<ScenarioId> {
        vec![ScenarioId::CapacityCrunch, ScenarioId::Stampede]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ThreePeers => "three_peers",
            ScenarioId::FlashMob => "flash_mob",
            ScenarioId::Dispersal => "dispersal",
            ScenarioId::Churn => "churn",
            ScenarioId::TransportShuffle => "transport_shuffle",
            ScenarioId::OptionsShift => "options_shift",
            ScenarioId::PreferredIsland => "preferred_island",
            ScenarioId::CapacityCrunch => "capacity_crunch",
            ScenarioId::Stampede => "stampede",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ThreePeers => "Peers at (0,0,0), (16,0,16), (90,0,90) settle into 2 islands",
            ScenarioId::FlashMob => "Four scattered groups walk to one square and merge",
            ScenarioId::Dispersal => "One dense crowd walks outward and splits apart",
            ScenarioId::Churn => "30% of peers go silent, heartbeats clear them",
            ScenarioId::TransportShuffle => "Transports come and go while the crowd moves",
            ScenarioId::OptionsShift => "Join/leave distances halve mid-run, then an idempotence check",
            ScenarioId::PreferredIsland => "A group arriving late asks to join an existing island",
            ScenarioId::CapacityCrunch => "Islands capped at 4 peers under constant motion",
            ScenarioId::Stampede => "400 peers, rolling disconnects and reconnections",
        }
    }

    /// Returns true if this is a stress scenario.
    pub fn is_stress(&self) -> bool {
        matches!(self, ScenarioId::CapacityCrunch | ScenarioId::Stampede)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "three_peers" | "threepeers" | "arc-001" => Ok(ScenarioId::ThreePeers),
            "flash_mob" | "flashmob" | "arc-002" => Ok(ScenarioId::FlashMob),
            "dispersal" | "arc-003" => Ok(ScenarioId::Dispersal),
            "churn" | "arc-004" => Ok(ScenarioId::Churn),
            "transport_shuffle" | "transportshuffle" | "arc-005" => Ok(ScenarioId::TransportShuffle),
            "options_shift" | "optionsshift" | "arc-006" => Ok(ScenarioId::OptionsShift),
            "preferred_island" | "preferredisland" | "arc-007" => Ok(ScenarioId::PreferredIsland),
            // Stress
            "capacity_crunch" | "capacitycrunch" | "arc-008" => Ok(ScenarioId::CapacityCrunch),
            "stampede" | "arc-009" => Ok(ScenarioId::Stampede),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
