#[macro_export]
macro_rules! cli_message {
		($fmt_string:expr, $( $arg:expr ),+) => {
			{
				use crate::common::is_cli;
				if is_cli() {
					println!($fmt_string, $( $arg ),*);
				} else {
					info!($fmt_string, $( $arg ),*);
				}
			}
		};

		($fmt_string:expr) => {
			{
				use crate::common::is_cli;
				if is_cli() {
					println!($fmt_string);
				} else {
					info!($fmt_string);
				}
			}
		};
	}
