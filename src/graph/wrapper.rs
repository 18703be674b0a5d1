use crate::graph::job::Job;

/// Exit code the wrapper uses when the wrapped command fails.
pub const WRAPPER_FAILURE_EXIT: i32 = 10;

/// Prefix of the line the wrapper prints after the command returns.
pub const EXIT_CODE_PREFIX: &str = "Exit code: ";

/// Render the bash wrapper that runs one job's command.
///
/// The command runs in a subshell whose combined output is teed into the job
/// log, so every part of a compound command is captured and `PIPESTATUS[0]`
/// is the subshell status rather than that of a trailing pipeline segment.
/// On success the finish marker is touched; on failure the script exits with
/// [`WRAPPER_FAILURE_EXIT`].
pub fn wrapper_script(job: &Job, path_export: Option<&str>) -> String {
    let log = shell_quote(&job.log_path.to_string_lossy());
    let marker = shell_quote(&job.finish_marker_path.to_string_lossy());

    let mut script = String::from("#!/bin/bash\nset -e\ndate\n");
    if let Some(path) = path_export {
        script.push_str(&format!("export PATH={}:$PATH\n", shell_quote(path)));
    }
    script.push_str(&format!("( {} ) 2>&1 | tee {}\n", job.command, log));
    script.push_str("exit_code=${PIPESTATUS[0]}\n");
    script.push_str(&format!(
        "echo \"{}$exit_code\" | tee -a {}\n",
        EXIT_CODE_PREFIX, log
    ));
    script.push_str(&format!(
        "if [ \"$exit_code\" -ne 0 ]; then\n    exit {}\nfi\n",
        WRAPPER_FAILURE_EXIT
    ));
    script.push_str(&format!("touch {}\n", marker));
    script
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
