/// Value printed by Slurm for fields that are not set.
pub const NULL_VALUE: &str = "(null)";

/// Returns the value of `key` from a single `scontrol --oneliner` line, or an empty string
/// if the line does not contain the key.
///
/// The line is a sequence of whitespace separated `<key>=<value>` items. Only the first `=`
/// separates the key, so values may contain `=` themselves (e.g. `AllocTRES=cpu=2,mem=10G`).
pub fn extract_value<'a>(line: &'a str, key: &str) -> &'a str {
    line.split_whitespace()
        .filter_map(|item| item.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, value)| value)
        .unwrap_or("")
}

/// Non-empty lines of the inventory command output.
pub fn inventory_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty())
}
