//! Inventory collection from the container runtime
//!
//! This module provides the two one-shot collectors (containers with their
//! inspection detail, images) and the scheduler that launches both on every
//! tick and hands their snapshots to the delivery queue.

mod r#loop;
mod tasks;


pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder, LoopStats};
pub use tasks::{collect_containers, collect_images, run_collector, CollectorKind};
