pub mod price_csv;
