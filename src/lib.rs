pub mod adler32;
pub mod inflate;
pub mod object;
pub mod zlib;
