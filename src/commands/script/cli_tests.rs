//! CLI parsing tests for the script command.

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use std::path::PathBuf;

    crate::cli_required_arg_test! {
        command: "script",
        test_name: test_script_requires_file,
        required_arg: "<FILE>",
    }

    crate::cli_parse_test! {
        variant: Script,
        test_name: test_defaults,
        args: ["script", "setup.sql"],
        fields: {
            file: PathBuf::from("setup.sql"),
            transaction: false,
        },
    }

    crate::cli_parse_test! {
        variant: Script,
        test_name: test_script_in_transaction,
        args: ["script", "setup.sql", "--transaction"],
        fields: {
            transaction: true,
        },
    }

    crate::cli_error_test! {
        test_name: test_script_rejects_extra_file,
        args: ["script", "one.sql", "two.sql"],
        kind: UnknownArgument,
    }
}
