#![allow(unused_imports)]

use quotaguard::prelude::*;
use std::time::Duration;

#[test]
fn prelude_covers_a_typical_setup() {
    let quota = MemoryQuota::new(10, Duration::from_secs(1)).unwrap();
    let config = AdmissionConfig::<String>::builder()
        .key_extractor(ClientIp::new().trust_forward_header(true))
        .exclude_keys(["127.0.0.1"])
        .refund_failed_requests(true)
        .build()
        .unwrap();
    let layer = AdmissionLayer::new(quota, config).with_sink(MemorySink::new());
    let _ = format!("{layer:?}");
    let _ = headers::LIMIT;
}
