//! Background tasks feeding the render loop

pub mod deployer;
pub mod relay;
