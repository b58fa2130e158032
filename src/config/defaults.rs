use super::{Criticality, Duration, ServiceConfig};

/// Services probed when the config file does not list any.
pub fn services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig::new("database", "Patient Records", Criticality::Critical)
            .with_endpoint("${CLINIC_BACKEND_URL}/rest/v1/")
            .with_header("apikey", "${CLINIC_BACKEND_KEY}")
            .with_fallback(true)
            .with_timing(Duration::from_secs(5), Duration::from_secs(30))
            .requires(&["CLINIC_BACKEND_URL", "CLINIC_BACKEND_KEY"]),
        ServiceConfig::new("booking", "Online Booking", Criticality::Critical)
            .with_endpoint("${BOOKING_API_URL}/health")
            .with_fallback(true)
            .requires(&["BOOKING_API_URL"]),
        ServiceConfig::new("email", "Email Notifications", Criticality::Important)
            .with_endpoint("${EMAIL_API_URL}/health")
            .with_header("authorization", "Bearer ${EMAIL_API_KEY}")
            .requires(&["EMAIL_API_URL", "EMAIL_API_KEY"]),
        ServiceConfig::new("maps", "Clinic Location Map", Criticality::Optional)
            .with_endpoint("https://maps.googleapis.com/maps/api/staticmap?center=0,0&size=1x1&key=${MAPS_API_KEY}")
            .with_timing(Duration::from_secs(5), Duration::from_secs(300))
            .requires(&["MAPS_API_KEY"]),
        ServiceConfig::new("analytics", "Site Analytics", Criticality::Optional)
            .with_fallback(false),
    ]
}
