// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Result, TrackerError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Gzips `data` and encodes the result as standard (padded) base64.
pub fn compress_and_encode(data: &str) -> Result<String> {
    let compressed = gzip(data.as_bytes())
        .map_err(|e| TrackerError::Serialization(format!("gzip failed: {e}")))?;
    Ok(STANDARD.encode(compressed))
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
