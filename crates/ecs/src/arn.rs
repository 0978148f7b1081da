/// Short ID of an ARN: the trailing path segment. ARNs without a path
/// separator pass through unchanged.
pub fn arn_tail(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}
