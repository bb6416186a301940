//! A [`std::io::Write`] decorator that masks secrets in the already-formatted
//! byte stream before it reaches the real sink (stderr or a rolling file).

use crate::sanitizer::SecretRegistry;
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

pub struct MaskingWriter<W> {
    inner: W,
    registry: SecretRegistry,
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let masked = self.registry.mask(&text);
        self.inner.write_all(masked.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A [`MakeWriter`] that wraps another `MakeWriter`, masking every record it
/// produces through the shared [`SecretRegistry`].
#[derive(Clone)]
pub struct MaskingMakeWriter<M> {
    inner: M,
    registry: SecretRegistry,
}

impl<M> MaskingMakeWriter<M> {
    pub fn new(inner: M, registry: SecretRegistry) -> Self {
        Self { inner, registry }
    }
}

impl<'a, M> MakeWriter<'a> for MaskingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: self.inner.make_writer(),
            registry: self.registry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_masks_before_forwarding() {
        let registry = SecretRegistry::new();
        registry.register("topsecretvalue12345");
        let mut buf = Vec::new();
        let mut writer = MaskingWriter {
            inner: &mut buf,
            registry,
        };
        writer.write_all(b"line with topsecretvalue12345 inside").unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(!out.contains("topsecretvalue12345"));
        assert!(out.contains("***"));
    }
}
