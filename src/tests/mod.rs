mod circuit_breaker_tests;
mod image_validator_tests;
mod support;
