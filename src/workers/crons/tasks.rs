/// Runs each task in order against `$ctx`, logging its result and elapsed
/// time. Evaluates to the number of tasks that returned an error.
#[macro_export]
macro_rules! cron_tasks {
    ($ctx:expr, $($t:path),* $(,)?) => {{
        let mut failed_tasks = 0usize;
        $({
            const TASK_NAME: &str = const_str::convert_ascii_case!(upper_camel, stringify!($t));
            let started = std::time::Instant::now();
            tracing::debug!(task = TASK_NAME, "Starting task");
            match ($t)($ctx).await {
                Ok(v) => tracing::info!(
                    task = TASK_NAME,
                    elapsed = ?started.elapsed(),
                    "Completed task with result {v:?}"
                ),
                Err(e) => {
                    failed_tasks += 1;
                    tracing::error!(
                        task = TASK_NAME,
                        elapsed = ?started.elapsed(),
                        "Task failed: {e}"
                    );
                }
            }
        })*
        failed_tasks
    }};
}
