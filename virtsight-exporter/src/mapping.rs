//! Prometheus metric name construction.

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse into one and
/// trailing underscores are dropped. A leading digit gets an underscore
/// prefix.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == ':' {
            c
        } else {
            '_'
        };
        if c == '_' && result.ends_with('_') {
            continue;
        }
        result.push(c);
    }

    let trimmed = result.trim_end_matches('_').len();
    result.truncate(trimmed);

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Build a full metric name from a family header, a metric suffix and a unit.
///
/// Format: `{header}{suffix}{unit}`, e.g. `libvirt_cpu_stats_` + `cpu_used` +
/// `_percent`.
pub fn build_metric_name(header: &str, suffix: &str, unit: &str) -> String {
    sanitize_metric_name(&format!("{}{}{}", header, suffix, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_metric_name_simple() {
        assert_eq!(sanitize_metric_name("read_bytes"), "read_bytes");
        assert_eq!(
            sanitize_metric_name("libvirt_mem_stats_available"),
            "libvirt_mem_stats_available"
        );
    }

    #[test]
    fn test_sanitize_metric_name_special_chars() {
        assert_eq!(sanitize_metric_name("swap.in"), "swap_in");
        assert_eq!(sanitize_metric_name("hugetlb-pgalloc"), "hugetlb_pgalloc");
        assert_eq!(sanitize_metric_name("disk[vda]"), "disk_vda");
    }

    #[test]
    fn test_sanitize_metric_name_collapse_underscores() {
        assert_eq!(sanitize_metric_name("mem___rss"), "mem_rss");
        assert_eq!(sanitize_metric_name("a//b//c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_metric_name_leading_number() {
        assert_eq!(sanitize_metric_name("1cpu"), "_1cpu");
    }

    #[test]
    fn test_sanitize_metric_name_empty() {
        assert_eq!(sanitize_metric_name(""), "unnamed");
        assert_eq!(sanitize_metric_name("///"), "unnamed");
    }

    #[test]
    fn test_sanitize_metric_name_colons() {
        assert_eq!(sanitize_metric_name("foo:bar"), "foo:bar");
    }

    #[test]
    fn test_build_metric_name() {
        assert_eq!(
            build_metric_name("libvirt_cpu_stats_", "cpu_used", "_percent"),
            "libvirt_cpu_stats_cpu_used_percent"
        );
        assert_eq!(
            build_metric_name("libvirt_mem_stats_", "available", ""),
            "libvirt_mem_stats_available"
        );
        assert_eq!(
            build_metric_name("libvirt_interface_", "read_bytes", ""),
            "libvirt_interface_read_bytes"
        );
    }
}
