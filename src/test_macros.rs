//! Test generators for command line parsing and command output.

/// Parse `args` as if given after the binary name.
#[doc(hidden)]
#[macro_export]
macro_rules! __parse_cli {
    ($($arg:expr),* $(,)?) => {
        <$crate::cli::Args as clap::Parser>::try_parse_from(["sql_session", $($arg),*])
    };
}

/// Parse a command line and compare fields of the resulting command.
///
/// Fields not listed are not checked, so a case with only the required
/// arguments doubles as the defaults test.
#[macro_export]
macro_rules! cli_parse_test {
    (
        variant: $variant:ident,
        test_name: $test_name:ident,
        args: [$($arg:literal),+ $(,)?],
        fields: { $($field:ident : $expected:expr),+ $(,)? } $(,)?
    ) => {
        #[rstest]
        fn $test_name() {
            let args = $crate::__parse_cli!($($arg),+).unwrap();
            let $crate::commands::Command::$variant(cmd) = args.command else {
                panic!(concat!("parsed to a command other than ", stringify!($variant)));
            };
            $(
                assert_eq!(cmd.$field, $expected, concat!("field `", stringify!($field), "`"));
            )+
        }
    };
}

/// Parsing `command` alone fails naming the missing `required_arg`.
#[macro_export]
macro_rules! cli_required_arg_test {
    (
        command: $cmd:literal,
        test_name: $test_name:ident,
        required_arg: $arg:literal $(,)?
    ) => {
        #[rstest]
        fn $test_name() {
            let err = $crate::__parse_cli!($cmd).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
            assert!(err.to_string().contains($arg), concat!("error should name ", $arg));
        }
    };
}

/// Parsing fails, optionally with a given `clap` error kind.
#[macro_export]
macro_rules! cli_error_test {
    (
        test_name: $test_name:ident,
        args: [$($arg:literal),+ $(,)?]
        $(, kind: $kind:ident)? $(,)?
    ) => {
        #[rstest]
        fn $test_name() {
            let result = $crate::__parse_cli!($($arg),+);
            assert!(result.is_err(), "command line should be rejected");
            $(
                assert_eq!(
                    result.unwrap_err().kind(),
                    clap::error::ErrorKind::$kind
                );
            )?
        }
    };
}

/// Table rendering of a fixture equals `expected`.
#[macro_export]
macro_rules! output_table_test {
    (
        test_name: $test_name:ident,
        fixture: $fixture:ident,
        fixture_type: $fixture_type:ty,
        expected: $expected:expr $(,)?
    ) => {
        #[rstest]
        fn $test_name($fixture: $fixture_type) {
            use $crate::output::Outputable;
            assert_eq!($fixture.to_table(), $expected);
        }
    };
}

/// JSON rendering of a fixture parses and has `expected` at each JSON
/// pointer.
#[macro_export]
macro_rules! output_json_test {
    (
        test_name: $test_name:ident,
        fixture: $fixture:ident,
        fixture_type: $fixture_type:ty,
        pointers: { $($pointer:literal => $expected:expr),* $(,)? } $(,)?
    ) => {
        #[rstest]
        fn $test_name($fixture: $fixture_type) {
            use $crate::output::{OutputFormat, Outputable};
            let parsed: serde_json::Value =
                serde_json::from_str(&$fixture.format(OutputFormat::Json)).unwrap();
            $(
                assert_eq!(
                    parsed.pointer($pointer),
                    Some(&serde_json::json!($expected)),
                    concat!("JSON at ", $pointer)
                );
            )*
        }
    };
}
