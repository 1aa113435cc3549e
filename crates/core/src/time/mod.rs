pub mod sheet_name;
