pub mod cli;
pub mod collectors;
pub mod exporter;

pub mod built_info {
    #![allow(clippy::pedantic)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
