//! Cross-crate flows.

mod bbdo_flows;
mod bus_flows;
mod e2e_broker;
