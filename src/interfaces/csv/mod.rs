pub mod catalog_reader;
pub mod session_reader;
pub mod status_writer;
