//! `std::io::Write` adapter over a filter session.
//!
//! Hosts that already push file content through writer chains can wrap a
//! session in [`FilterWriter`]; it drives the action protocol internally and
//! forwards whatever the filter emits.

use std::io::{self, Write};

use valvfilter_host::Action;

use crate::{stream::Aes256Filter, FRAMED_BLOCK_SIZE};

pub struct FilterWriter<W: Write> {
    filter: Aes256Filter,
    inner: W,
    action: Action,
    out: Vec<u8>,
}

impl<W: Write> FilterWriter<W> {
    pub fn new(filter: Aes256Filter, inner: W) -> Self {
        Self {
            filter,
            inner,
            action: Action::Normal,
            out: vec![0u8; FRAMED_BLOCK_SIZE],
        }
    }

    /// Signal end of data, drain everything the filter still holds and
    /// return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        loop {
            let (n, action) = self
                .filter
                .process(&[], &mut self.out, Action::DataEnd)
                .map_err(io::Error::other)?;
            self.inner.write_all(&self.out[..n])?;
            self.action = action;
            if n == 0 && action != Action::Repeat {
                break;
            }
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for FilterWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let (n, action) = self
                .filter
                .process(buf, &mut self.out, self.action)
                .map_err(io::Error::other)?;
            self.inner.write_all(&self.out[..n])?;
            self.action = action;
            if action != Action::Repeat {
                break;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
