pub mod archive;
pub mod bytes;
pub mod charset;
pub mod dostime;
pub mod format;
pub mod memory;
pub mod options;
