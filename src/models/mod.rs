pub mod audit;
pub mod card_number;
pub mod cart;
pub mod credit_card;
pub mod customer;
pub mod money;
pub mod order;
pub mod product;

pub use audit::{AuditEventType, AuditLogEntry, AuditStatus, NewAuditEvent};
pub use card_number::{CardBrand, CardNumber};
pub use cart::{Cart, CartLine};
pub use credit_card::{CardData, CreditCard};
pub use customer::Customer;
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus};
pub use product::Product;
