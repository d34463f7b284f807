pub mod order_repository;

pub use order_repository::{
    generate_order_number, NewOrder, OrderFilter, OrderPatch, OrderRepository, OrderStore,
};
