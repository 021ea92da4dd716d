// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the tracker's own diagnostics.
//!
//! Messages carry a component prefix (`CLIENT |`, `TRANSPORT |`, ...). [`Formatter`] adds the
//! `ERROR_TRACKER` prefix to events emitted by this crate only, so it can double as the host
//! application's formatter without mislabelling the host's own lines:
//!
//! ```text
//! ERROR_TRACKER | WARN | REGISTRY | Replacing tracker instance "billing"
//! INFO | order placed id=42
//! ```

use crate::error::{Result, TrackerError};
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if is_tracker_target(metadata.target()) {
            write!(writer, "ERROR_TRACKER | ")?;
        }
        write!(writer, "{} | ", metadata.level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn is_tracker_target(target: &str) -> bool {
    target
        .strip_prefix(CRATE_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Installs a global subscriber using [`Formatter`].
///
/// `RUST_LOG` takes precedence over `level`. HTTP client internals are silenced.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{level}")))
        .map_err(|e| TrackerError::Configuration(format!("invalid log level {level:?}: {e}")))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TrackerError::Configuration(e.to_string()))
}
