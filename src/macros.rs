/// Runs `$code` and records its wall time, in seconds, on the histogram `$metric`.
///
/// The value of `$code` is returned unchanged, so `?` and early returns inside
/// the block behave as if the macro were not there.
#[macro_export]
macro_rules! measure {
    ($metric:expr, $code:block) => {{
        let _timer = $metric.start_timer();
        $code
    }};
    ($metric:expr, $code:expr) => {
        $crate::measure!($metric, { $code })
    };
}
