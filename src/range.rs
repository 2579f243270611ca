//! `Range` header parsing.
//!
//! Only the `bytes` unit is supported and only the first comma-separated
//! spec is honored. `to` is exclusive throughout: `bytes=0-10` parses to
//! `from = 0, to = 11`. A suffix range (`bytes=-N`) is kept symbolic until
//! the artifact size is known, then resolved to `from = total - N`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("Unsupported range unit. Please use bytes.")]
    UnsupportedUnit,

    #[error("Invalid range request.")]
    Invalid,

    #[error("Requested range is not satisfiable.")]
    Unsatisfiable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeRequest {
    pub from: u64,
    /// Exclusive end; 0 means "until the end of the payload".
    pub to: u64,
    /// Last-N-bytes form; nonzero only until `resolve` pins it.
    pub suffix: u64,
    /// Payload size, filled in once metadata is known.
    pub total: u64,
}

impl RangeRequest {
    /// Parse a `Range` header. An empty header yields the zero value, which
    /// `requested()` reports as "no range asked for".
    pub fn parse(header: &str) -> Result<RangeRequest, RangeError> {
        let mut req = RangeRequest::default();
        if header.is_empty() {
            return Ok(req);
        }

        let Some(rest) = header.strip_prefix("bytes=") else {
            return Err(RangeError::UnsupportedUnit);
        };
        let spec = rest.split(',').next().unwrap_or("").trim();

        let Some((start, end)) = spec.split_once('-') else {
            return Err(RangeError::Invalid);
        };
        let (start, end) = (start.trim(), end.trim());

        if !start.is_empty() {
            req.from = start.parse().map_err(|_| RangeError::Invalid)?;
            if !end.is_empty() {
                let last: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
                req.to = last + 1;
            }
        } else if !end.is_empty() {
            req.suffix = end.parse().map_err(|_| RangeError::Invalid)?;
        }

        if req.to != 0 && req.to <= req.from {
            return Err(RangeError::Invalid);
        }

        Ok(req)
    }

    pub fn requested(&self) -> bool {
        self.from != 0 || self.to != 0 || self.suffix != 0
    }

    /// Byte count this range will produce.
    pub fn size(&self) -> u64 {
        if self.suffix > 0 {
            self.suffix
        } else if self.to == 0 {
            self.total.saturating_sub(self.from)
        } else {
            self.to - self.from
        }
    }

    /// Pin the range against the payload size: the suffix form becomes an
    /// explicit window and an open end is closed. A start at or beyond the
    /// end of the payload is unsatisfiable.
    pub fn resolve(&self, total: u64) -> Result<RangeRequest, RangeError> {
        let (from, to) = if self.suffix > 0 {
            (total.saturating_sub(self.suffix), total)
        } else {
            (self.from, if self.to == 0 { total } else { self.to.min(total) })
        };

        if from >= total {
            return Err(RangeError::Unsatisfiable);
        }

        Ok(RangeRequest {
            from,
            to,
            suffix: 0,
            total,
        })
    }

    /// `Content-Range` value, e.g. `bytes 10-19/100`.
    pub fn content_range(&self) -> String {
        let to = if self.to == 0 { self.total } else { self.to };
        format!("bytes {}-{}/{}", self.from, to.saturating_sub(1), self.total)
    }
}
