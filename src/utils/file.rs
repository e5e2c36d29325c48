use std::io::{Read, Seek, SeekFrom};

/// A helper trait for things that implement both `Read` and `Seek`
pub trait SeekableRead: Seek + Read {}
impl<T> SeekableRead for T where T: Seek + Read {}

pub trait Tell {
    /// Gets the current position
    fn tell(&mut self) -> std::io::Result<u64>;
}

impl<S: Seek> Tell for S {
    fn tell(&mut self) -> std::io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }
}
