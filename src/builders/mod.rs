pub mod quick_return;
