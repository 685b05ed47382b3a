/// Evaluates `$block` and, with the `stats` feature, stores its wall time in `$slot`.
macro_rules! timed {
    ($slot:expr, $block:block) => {{
        #[cfg(feature = "stats")]
        let started = std::time::Instant::now();
        let result = $block;
        #[cfg(feature = "stats")]
        {
            $slot = started.elapsed();
        }
        result
    }};
}

pub(crate) use timed;
