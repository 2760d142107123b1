/// Database models for InvoiceFlow
///
/// Each model owns its table schema and CRUD operations. All queries go
/// through sqlx with explicit column lists; organization scoping is enforced
/// at the query level, never in application code after the fact.

pub mod invoice;
pub mod notification;
pub mod organization;
pub mod setting;
pub mod user;
pub mod webhook_endpoint;

pub use invoice::{Invoice, LineItem};
pub use notification::Notification;
pub use organization::Organization;
pub use setting::{Setting, UserSetting};
pub use user::User;
pub use webhook_endpoint::WebhookEndpoint;
