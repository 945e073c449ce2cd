pub mod amqp;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod postgres;
pub mod sink;
