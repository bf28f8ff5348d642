//! Typed client for the rental-property API.

mod client;
mod types;

pub use client::RentalClient;
pub use types::{
  Contract, Entity, MaintenanceRequest, MaintenanceStatus, NewMaintenanceRequest, NewPayment,
  Payment, Property, Tenant,
};
