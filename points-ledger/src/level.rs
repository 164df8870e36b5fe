//! Level tiers derived from lifetime earned points

/// Minimum `earned` for each level; index 0 is level 1
pub const LEVEL_THRESHOLDS: [u64; 7] = [0, 100, 300, 700, 1_500, 3_000, 6_000];

/// Level for a lifetime earned amount
pub fn level_for(earned: u64) -> u32 {
    LEVEL_THRESHOLDS
        .iter()
        .take_while(|threshold| earned >= **threshold)
        .count() as u32
}
