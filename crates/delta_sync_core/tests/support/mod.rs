#![allow(dead_code)]

pub mod bucket;
pub mod processor;
