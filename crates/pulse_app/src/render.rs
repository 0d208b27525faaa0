use pulse_core::{FetchCounters, JobKind, JobView, Lifecycle, StepStatus};

const BAR_WIDTH: usize = 30;

/// Renders one frame of the job display.
pub fn render(view: &JobView) -> String {
    let Some(job_id) = &view.job_id else {
        return "No job tracked".to_string();
    };

    let kind = match view.kind {
        JobKind::Analysis => "Analysis",
        JobKind::Fetch => "Fetch",
    };
    let mut lines = vec![format!(
        "{kind} {job_id}  {bar} {percent:>3}%  {phase}",
        bar = progress_bar(view.percent),
        percent = view.percent,
        phase = view.phase
    )];

    match view.kind {
        JobKind::Analysis => {
            lines.extend(
                view.steps
                    .iter()
                    .map(|step| format!("  {} {}", step_marker(step.status), step.label)),
            );
        }
        JobKind::Fetch => {
            let phases: Vec<String> = view
                .steps
                .iter()
                .map(|step| format!("{} {}", step_marker(step.status), step.label))
                .collect();
            lines.push(format!("  {}", phases.join("  ")));
            if let Some(counters) = &view.counters {
                lines.push(format!("  {}", format_counters(counters)));
            }
        }
    }

    if let Some(message) = &view.message {
        lines.push(format!("  {message}"));
    }
    lines.push(format!("  {}", hints(view)));
    lines.join("\n")
}

fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn step_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "[ ]",
        StepStatus::Running => "[>]",
        StepStatus::Done => "[x]",
        StepStatus::Error => "[!]",
    }
}

fn format_counters(counters: &FetchCounters) -> String {
    let mut out = format!(
        "posts {}/{}  created {}  updated {}  skipped {}",
        format_with_commas(counters.fetched),
        format_with_commas(counters.target),
        format_with_commas(counters.created),
        format_with_commas(counters.updated),
        format_with_commas(counters.skipped)
    );
    if counters.download_total > 0 {
        out.push_str(&format!(
            "  media {}/{}",
            format_with_commas(counters.downloaded),
            format_with_commas(counters.download_total)
        ));
        if counters.download_failed > 0 {
            out.push_str(&format!(" ({} failed)", counters.download_failed));
        }
    }
    out
}

fn hints(view: &JobView) -> &'static str {
    match view.lifecycle {
        Lifecycle::Error if view.can_retry => "r: retry  q: dismiss",
        Lifecycle::Error => "retrying...  q: dismiss",
        Lifecycle::Done => "finished",
        _ => "q: dismiss",
    }
}

fn format_with_commas(value: u64) -> String {
    let mut out = String::new();
    for (i, ch) in value.to_string().chars().rev().enumerate() {
        if i != 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}
