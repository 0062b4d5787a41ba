//! The downstream byte-sink seam.

use std::io;

/// Destination for the raw correction byte stream.
///
/// This is the one polymorphism point of the client: anything that accepts
/// binary writes (a serial port handle, a file, a `Vec<u8>` in tests) can
/// be the downstream GNSS link. The return value reports bytes written but
/// is advisory; the session engine forwards each read exactly once and does
/// not retry short writes.
pub trait CorrectionSink: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// Any `io::Write` is a correction sink.
impl<W: io::Write + Send> CorrectionSink for W {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        io::Write::write(self, data)
    }
}
