pub mod line_framer;
