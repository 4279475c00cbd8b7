// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Marker text.
//
// Every marker is the configured template with its `%s` slots filled in
// order (name, parameter, job id) followed by CRLF. Nothing else in the
// template is interpreted, so the DSC `%%` lead-in reaches the wire as is.

use psrelay_core::config::{RelaySettings, TEMPLATE_SLOTS};
use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::JobId;

/// Display name rendered into the end-of-stream sentinel.
pub const END_STREAM_NAME: &str = "PSINJECT_ENDSTREAM";

const LINE_END: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(usize),
}

/// A parsed marker template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTemplate {
    segments: Vec<Segment>,
}

impl MarkerTemplate {
    /// Parse `template`. Fails unless it has exactly [`TEMPLATE_SLOTS`] slots.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut slot = 0;
        for (i, piece) in template.split("%s").enumerate() {
            if i > 0 {
                segments.push(Segment::Slot(slot));
                slot += 1;
            }
            if !piece.is_empty() {
                segments.push(Segment::Literal(piece.to_owned()));
            }
        }
        if slot != TEMPLATE_SLOTS {
            return Err(RelayError::Template(format!(
                "'{template}' has {slot} %s slots, expected {TEMPLATE_SLOTS}"
            )));
        }
        Ok(Self { segments })
    }

    /// Fill the slots with `name`, `param` and `job_id`, no line ending.
    pub fn render(&self, name: &str, param: &str, job_id: &str) -> String {
        let args = [name, param, job_id];
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(idx) => out.push_str(args[*idx]),
            }
        }
        out
    }
}

/// Builds every marker of one job.
#[derive(Debug, Clone)]
pub struct MarkerBuilder {
    template: MarkerTemplate,
    set_param_command: String,
    prefix: String,
    pad_char_count: usize,
    job_id: String,
}

impl MarkerBuilder {
    pub fn new(settings: &RelaySettings, job_id: JobId) -> Result<Self> {
        Ok(Self {
            template: MarkerTemplate::parse(&settings.marker_template)?,
            set_param_command: settings.set_param_command.clone(),
            prefix: settings.marker_prefix.clone(),
            pad_char_count: settings.pad_char_count,
            job_id: job_id.to_string(),
        })
    }

    /// Marker line for an arbitrary command name and parameter.
    pub fn line(&self, name: &str, param: &str) -> String {
        let mut line = self.template.render(name, param, &self.job_id);
        line.push_str(LINE_END);
        line
    }

    /// Marker of a structural point, parameterised with the page number.
    pub fn structural(&self, name: &str, page: u32) -> String {
        self.line(name, &page.to_string())
    }

    /// Set-parameter-id marker, emitted at the end of the header comments.
    /// The parameter is empty when the job has no parameter id.
    pub fn set_param_id(&self, parameter_id: Option<&str>) -> String {
        self.line(&self.set_param_command, parameter_id.unwrap_or_default())
    }

    /// Job id line written once to the host's own output.
    pub fn job_id_line(&self) -> String {
        format!("{}{LINE_END}", self.job_id)
    }

    /// End-of-stream sentinel. Its first occurrence in the output ends the job.
    pub fn sentinel(&self) -> String {
        self.line(END_STREAM_NAME, "")
    }

    /// Pad lines pushing later output (the sentinel in particular) across
    /// buffer boundaries. Empty unless a pad size is configured.
    pub fn pad_block(&self) -> String {
        let line = format!("{}PAD{LINE_END}", self.prefix);
        line.repeat(self.pad_char_count / line.len())
    }
}
