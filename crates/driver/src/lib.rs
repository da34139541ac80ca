//! A CSI plugin for Compute Engine persistent disks.
//!
//! The controller half provisions and attaches disks through a
//! [cloud::CloudProvider]; the node half stages and publishes attached disks
//! through a [pd_csi_mount_utils::Mounter]. Both are plain values built once
//! at startup and handed to a [driver::Driver].

pub mod cloud;
pub mod config;
pub mod controller;
pub mod device;
pub mod driver;
pub mod ids;
pub mod lock;
pub mod metadata;
pub mod node;
pub mod params;
