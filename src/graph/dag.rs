use std::collections::BTreeMap;

use crate::graph::job::Job;

/// Renders a DAG description from a job list.
pub trait DagFormatter {
    fn render(&self, jobs: &[Job]) -> String;
}

/// DAGMan syntax: one `JOB` line per node, then `PARENT ... CHILD ...` lines
/// linking every job at depth `d` to every job at depth `d + 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagmanFormatter;

impl DagFormatter for DagmanFormatter {
    fn render(&self, jobs: &[Job]) -> String {
        let mut out = String::new();
        for job in jobs {
            out.push_str(&format!(
                "JOB {} {}\n",
                job.name(),
                job.condor_file_path.display()
            ));
        }

        let mut tiers: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for job in jobs {
            tiers.entry(job.hierarchy_depth).or_default().push(job.name());
        }

        let tiers: Vec<&Vec<String>> = tiers.values().collect();
        for pair in tiers.windows(2) {
            out.push_str(&format!(
                "PARENT {} CHILD {}\n",
                pair[0].join(" "),
                pair[1].join(" ")
            ));
        }
        out
    }
}
