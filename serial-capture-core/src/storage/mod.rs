pub mod naming;
pub mod sink_writer;
