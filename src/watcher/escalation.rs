use std::path::Path;

use regex::Regex;

use crate::descriptor::JobDescriptor;
use crate::error::Result;

const GPUMEM_PATTERN: &str = r"GPUMEM\s*>=\s*(\d+)";

/// Smallest tier strictly above `current`; the lowest tier when there is no
/// current requirement. `None` once `current` reaches the top tier.
pub fn next_gpu_threshold(current: Option<u64>, thresholds: &[u64]) -> Option<u64> {
    match current {
        Some(current) => thresholds.iter().copied().find(|&t| t > current),
        None => thresholds.first().copied(),
    }
}

/// Current `GPUMEM >= N` value in a submit file's requirements.
pub fn current_gpu_memory(descriptor: &JobDescriptor) -> Result<Option<u64>> {
    let re = Regex::new(GPUMEM_PATTERN)?;
    Ok(descriptor
        .items("requirements")
        .unwrap_or_default()
        .into_iter()
        .find_map(|clause| re.captures(clause).and_then(|c| c[1].parse().ok())))
}

/// Raise the GPU memory clause of one submit file to the next tier.
///
/// Returns the new value, or `None` if the file is already at the top tier
/// (the file is left untouched in that case).
pub fn escalate_submit_file(path: &Path, thresholds: &[u64]) -> Result<Option<u64>> {
    let Some(plan) = plan_escalation(path, thresholds)? else {
        return Ok(None);
    };
    let next = plan.next;
    plan.apply()?;
    Ok(Some(next))
}

/// Escalate every given submit file. False if any of them is already at the
/// top tier, in which case none of them is rewritten.
pub fn escalate_gpu_memory<P: AsRef<Path>>(submit_files: &[P], thresholds: &[u64]) -> Result<bool> {
    let mut plans = Vec::with_capacity(submit_files.len());
    for path in submit_files {
        match plan_escalation(path.as_ref(), thresholds)? {
            Some(plan) => plans.push(plan),
            None => {
                tracing::warn!(
                    submit_file = %path.as_ref().display(),
                    "GPU memory already at the highest tier"
                );
                return Ok(false);
            }
        }
    }
    for plan in plans {
        plan.apply()?;
    }
    Ok(true)
}

/// A loaded submit file and the tier it is about to be raised to.
struct Escalation<'a> {
    path: &'a Path,
    descriptor: JobDescriptor,
    current: Option<u64>,
    next: u64,
}

fn plan_escalation<'a>(path: &'a Path, thresholds: &[u64]) -> Result<Option<Escalation<'a>>> {
    let descriptor = JobDescriptor::load(path)?;
    let current = current_gpu_memory(&descriptor)?;
    Ok(next_gpu_threshold(current, thresholds).map(|next| Escalation {
        path,
        descriptor,
        current,
        next,
    }))
}

impl Escalation<'_> {
    fn apply(mut self) -> Result<()> {
        let re = Regex::new(GPUMEM_PATTERN)?;
        let replacement = format!("GPUMEM >= {}", self.next);
        let mut clauses: Vec<String> = self
            .descriptor
            .items("requirements")
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        match clauses.iter_mut().find(|clause| re.is_match(clause)) {
            Some(clause) => *clause = re.replace(clause, replacement.as_str()).into_owned(),
            None => clauses.push(replacement),
        }

        self.descriptor.set("requirements", clauses)?;
        self.descriptor.write(self.path)?;
        tracing::info!(
            submit_file = %self.path.display(),
            from = ?self.current,
            to = self.next,
            "GPU memory requirement raised"
        );
        Ok(())
    }
}

/// Next CPU memory tier at or after `index` that is above the current request.
/// Returns the tier's index and value.
pub fn next_cpu_tier(
    index: usize,
    current_request: Option<u64>,
    thresholds: &[u64],
) -> Option<(usize, u64)> {
    thresholds
        .iter()
        .copied()
        .enumerate()
        .skip(index)
        .find(|&(_, mb)| current_request.map_or(true, |current| mb > current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TIERS: [u64; 3] = [10_000, 20_000, 40_000];

    #[test]
    fn picks_next_tier() {
        assert_eq!(next_gpu_threshold(Some(15_000), &TIERS), Some(20_000));
        assert_eq!(next_gpu_threshold(Some(10_000), &TIERS), Some(20_000));
        assert_eq!(next_gpu_threshold(None, &TIERS), Some(10_000));
    }

    #[test]
    fn top_tier_is_exhausted() {
        assert_eq!(next_gpu_threshold(Some(40_000), &TIERS), None);
        assert_eq!(next_gpu_threshold(Some(90_000), &TIERS), None);
    }

    fn submit_file(dir: &Path, name: &str, requirements: Option<&str>) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut d = JobDescriptor::new();
        d.set("executable", "/exec/0.sh").unwrap();
        if let Some(req) = requirements {
            d.set("requirements", "(CUDACapability >= 7)").unwrap();
            d.append("requirements", req).unwrap();
        }
        d.write(&path).unwrap();
        path
    }

    #[test]
    fn rewrites_existing_clause() {
        let dir = tempfile::tempdir().unwrap();
        let path = submit_file(dir.path(), "0.condor", Some("GPUMEM >= 15000"));

        assert_eq!(escalate_submit_file(&path, &TIERS).unwrap(), Some(20_000));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(
            "requirements = ((CUDACapability >= 7)) && (GPUMEM >= 20000)"
        ));
    }

    #[test]
    fn appends_missing_clause() {
        let dir = tempfile::tempdir().unwrap();
        let path = submit_file(dir.path(), "0.condor", None);

        assert_eq!(escalate_submit_file(&path, &TIERS).unwrap(), Some(10_000));
        let d = JobDescriptor::load(&path).unwrap();
        assert_eq!(current_gpu_memory(&d).unwrap(), Some(10_000));
    }

    #[test]
    fn exhausted_file_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = submit_file(dir.path(), "0.condor", Some("GPUMEM >= 40000"));
        let before = fs::read_to_string(&path).unwrap();

        assert!(!escalate_gpu_memory(&[&path], &TIERS).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn no_file_changes_when_a_later_one_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let low = submit_file(dir.path(), "0.condor", Some("GPUMEM >= 15000"));
        let top = submit_file(dir.path(), "1.condor", Some("GPUMEM >= 40000"));
        let low_before = fs::read_to_string(&low).unwrap();
        let top_before = fs::read_to_string(&top).unwrap();

        assert!(!escalate_gpu_memory(&[&low, &top], &TIERS).unwrap());
        assert_eq!(fs::read_to_string(&low).unwrap(), low_before);
        assert_eq!(fs::read_to_string(&top).unwrap(), top_before);

        assert!(escalate_gpu_memory(&[&low], &TIERS).unwrap());
        let d = JobDescriptor::load(&low).unwrap();
        assert_eq!(current_gpu_memory(&d).unwrap(), Some(20_000));
    }

    #[test]
    fn cpu_tier_skips_values_below_request() {
        let tiers = [16_384, 32_768, 65_536];
        assert_eq!(next_cpu_tier(0, None, &tiers), Some((0, 16_384)));
        assert_eq!(next_cpu_tier(0, Some(20_000), &tiers), Some((1, 32_768)));
        assert_eq!(next_cpu_tier(2, Some(1_000), &tiers), Some((2, 65_536)));
        assert_eq!(next_cpu_tier(3, None, &tiers), None);
        assert_eq!(next_cpu_tier(0, Some(65_536), &tiers), None);
    }
}
