pub mod contract_workflow;
pub mod gas_transport;
pub mod purchaser;
pub mod seller;
pub mod siphon;
pub mod storage_ship;
pub mod task_worker;
