pub mod calendar;
pub mod cn_market;
