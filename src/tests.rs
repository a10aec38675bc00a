#[cfg(test)]
mod integration_tests {
    use crate::config::{Config, OutputFormat, Viewport};
    use std::time::Duration;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.browser_pool_size, 10);
        assert_eq!(config.max_concurrent_screenshots, 200);
        assert_eq!(config.screenshot_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert!(matches!(config.output_format, OutputFormat::Png));
    }

    #[test]
    fn test_viewport_default() {
        let viewport = Viewport::default();
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
        assert_eq!(viewport.device_scale_factor, 1.0);
        assert!(!viewport.mobile);
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config::default();
        let args = crate::config::get_chrome_args(&config);

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        )));
    }

    #[test]
    fn test_browser_config_creation() {
        let config = Config::default();
        // BrowserConfig's fields are private; just verify construction doesn't panic.
        let _browser_config = crate::config::create_browser_config(&config);
    }

    #[test]
    fn test_error_retryable() {
        use crate::error::ScreenshotError;

        assert!(ScreenshotError::BrowserUnavailable.is_retryable());
        assert!(ScreenshotError::NetworkError("test".to_string()).is_retryable());
        assert!(ScreenshotError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ScreenshotError::InvalidUrl("test".to_string()).is_retryable());
        assert!(!ScreenshotError::ConfigurationError("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_severity() {
        use crate::error::{ErrorSeverity, ScreenshotError};

        assert!(matches!(
            ScreenshotError::InvalidUrl("test".to_string()).severity(),
            ErrorSeverity::Low
        ));
        assert!(matches!(
            ScreenshotError::NetworkError("test".to_string()).severity(),
            ErrorSeverity::Medium
        ));
        assert!(matches!(
            ScreenshotError::ConfigurationError("test".to_string()).severity(),
            ErrorSeverity::High
        ));
        assert!(matches!(
            ScreenshotError::MemoryLimitExceeded.severity(),
            ErrorSeverity::High
        ));
    }

    #[test]
    fn test_circuit_breaker() {
        use crate::error::CircuitBreaker;

        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        // Initially closed
        assert!(breaker.can_execute());
        assert_eq!(breaker.get_failure_count(), 0);

        // Record failures
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute()); // Still closed

        breaker.record_failure();
        assert!(!breaker.can_execute()); // Now open

        // Record success should reset
        breaker.record_success();
        assert!(breaker.can_execute());
        assert_eq!(breaker.get_failure_count(), 0);
    }
}
