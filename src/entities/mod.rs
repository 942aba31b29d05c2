pub mod audit_log;
pub mod cart;
pub mod cart_item;
pub mod credit_card;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod product;
