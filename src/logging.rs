use owo_colors::OwoColorize;
use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{Format, Full, Writer};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::diff::{inline_diff, DiffReport};

/// Target used for transformation pipeline records.
pub const PIPELINE_TARGET: &str = "clipswap::pipeline";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepText {
    Shown { before: String, after: String },
    Redacted,
}

/// One rule application inside a pipeline record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStepRecord {
    name: String,
    text: StepText,
    replacements: Option<usize>,
}

impl PipelineStepRecord {
    pub fn new(
        name: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
        replacements: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            text: StepText::Shown {
                before: before.into(),
                after: after.into(),
            },
            replacements,
        }
    }

    /// A step whose text must never reach the log.
    pub fn redacted(name: impl Into<String>, replacements: Option<usize>) -> Self {
        Self {
            name: name.into(),
            text: StepText::Redacted,
            replacements,
        }
    }

    pub fn is_redacted(&self) -> bool {
        self.text == StepText::Redacted
    }

    fn redact(&mut self) {
        self.text = StepText::Redacted;
    }
}

/// Input, output and every step of one transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPipelineRecord {
    input: String,
    output: Option<String>,
    steps: Vec<PipelineStepRecord>,
}

impl TextPipelineRecord {
    /// Once a step is redacted, every later step and the final output carry
    /// the secret as well and are redacted too.
    pub fn new(input: String, output: String, mut steps: Vec<PipelineStepRecord>) -> Self {
        let first_redacted = steps.iter().position(PipelineStepRecord::is_redacted);
        if let Some(index) = first_redacted {
            steps[index..].iter_mut().for_each(PipelineStepRecord::redact);
        }

        Self {
            input,
            output: first_redacted.is_none().then_some(output),
            steps,
        }
    }

    pub fn steps(&self) -> &[PipelineStepRecord] {
        &self.steps
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn render(&self, colored: bool) -> String {
        let mut out = String::new();
        let total: usize = self.steps.iter().filter_map(|step| step.replacements).sum();
        let header = format!(
            "text pipeline: {} step(s), {} replacement(s)",
            self.steps.len(),
            total
        );
        if colored {
            let _ = writeln!(out, "{}", header.bold());
        } else {
            let _ = writeln!(out, "{header}");
        }
        let _ = writeln!(out, "  input:  {:?}", self.input);

        for (index, step) in self.steps.iter().enumerate() {
            let count = step
                .replacements
                .map(|n| format!(" ({n})"))
                .unwrap_or_default();
            let label = format!("[{}] {}{}", index + 1, step.name, count);
            let label = if colored {
                label.cyan().to_string()
            } else {
                label
            };
            match &step.text {
                StepText::Shown { before, after } if before == after => {
                    let _ = writeln!(out, "  {label}: unchanged");
                }
                StepText::Shown { before, after } => {
                    let _ = writeln!(out, "  {label}: {}", inline_diff(before, after, colored));
                }
                StepText::Redacted => {
                    let _ = writeln!(out, "  {label}: {REDACTED}");
                }
            }
        }

        match &self.output {
            Some(output) => {
                let _ = write!(out, "  output: {output:?}");
            }
            None => {
                let _ = write!(out, "  output: {REDACTED}");
            }
        }
        out
    }
}

/// Log events go to stderr, so color follows stderr.
fn log_colors() -> bool {
    std::io::stderr().is_terminal()
}

/// Emits a pipeline record at DEBUG level under [`PIPELINE_TARGET`].
pub fn record_text_pipeline(record: TextPipelineRecord) {
    tracing::debug!(target: PIPELINE_TARGET, "{}", record.render(log_colors()));
}

/// Word counts and, unless `redact` is set, the inline diff itself.
pub fn render_diff(report: &DiffReport, redact: bool, colored: bool) -> String {
    let stats = report.stats();
    let header = format!(
        "last change: {} word(s) removed, {} added, {} unchanged",
        stats.removed, stats.added, stats.unchanged
    );
    let body = if redact {
        REDACTED.to_string()
    } else {
        inline_diff(report.original(), report.modified(), colored)
    };
    if colored {
        format!("{}\n  {body}", header.bold())
    } else {
        format!("{header}\n  {body}")
    }
}

/// Emits the latest diff at INFO level under [`PIPELINE_TARGET`].
pub fn record_diff(report: &DiffReport, redact: bool) {
    tracing::info!(target: PIPELINE_TARGET, "{}", render_diff(report, redact, log_colors()));
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        }
    }
}

/// Default full formatter, except pipeline records are printed as-is so
/// their multi-line layout survives.
pub struct TextPipelineFormatter {
    inner: Format<Full, SystemTime>,
}

impl TextPipelineFormatter {
    pub fn new() -> Self {
        Self {
            inner: Format::default(),
        }
    }
}

impl Default for TextPipelineFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for TextPipelineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if event.metadata().target() != PIPELINE_TARGET {
            return self.inner.format_event(ctx, writer, event);
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.message)
    }
}
