//! Object store path layout (§6):
//! `<run_id>/raw/<bucket_path>/batch_<zpad20_first>_<zpad20_last>.pb`
//! where `bucket_path` fans out directories by dividing `first_tick` by
//! configured divisors, bounding directory fan-out.

/// Default folder divisors, producing a 3-digit/3-digit folder layout.
pub const DEFAULT_FOLDER_LEVELS: [u64; 2] = [100_000_000, 100_000];

pub fn metadata_path(run_id: &str) -> String {
    format!("{run_id}/metadata.pb")
}

fn bucket_path(first_tick: u64, levels: &[u64]) -> String {
    let mut remainder = first_tick;
    let mut parts = Vec::with_capacity(levels.len());
    for &divisor in levels {
        parts.push(format!("{:03}", remainder / divisor));
        remainder %= divisor;
    }
    parts.join("/")
}

pub fn batch_path(run_id: &str, first_tick: u64, last_tick: u64, levels: &[u64]) -> String {
    format!(
        "{run_id}/raw/{}/batch_{:020}_{:020}.pb",
        bucket_path(first_tick, levels),
        first_tick,
        last_tick
    )
}

pub fn raw_prefix(run_id: &str) -> String {
    format!("{run_id}/raw/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_zero_padded_path() {
        let path = batch_path("run-1", 150_000_123, 150_000_199, &DEFAULT_FOLDER_LEVELS);
        assert_eq!(
            path,
            "run-1/raw/001/500/batch_00000000150000123_00000000150000199.pb"
        );
    }

    #[test]
    fn lexical_order_matches_tick_order() {
        let a = batch_path("run-1", 0, 49, &DEFAULT_FOLDER_LEVELS);
        let b = batch_path("run-1", 50, 99, &DEFAULT_FOLDER_LEVELS);
        let c = batch_path("run-1", 100, 149, &DEFAULT_FOLDER_LEVELS);
        let mut paths = vec![c.clone(), a.clone(), b.clone()];
        paths.sort();
        assert_eq!(paths, vec![a, b, c]);
    }
}
