use crate::models::device::DeviceFingerprint;
use crate::models::session::{SecurityVerdict, SessionRecord, SessionRejection};
use chrono::{DateTime, Utc};

/// Decides whether a stored session may still be used from the current device.
#[derive(Debug, Clone, Copy)]
pub struct SecurityValidator {
    max_travel_speed_kmh: f64,
}

impl SecurityValidator {
    pub fn new(max_travel_speed_kmh: f64) -> Self {
        Self { max_travel_speed_kmh }
    }

    /// Checks run in a fixed order: existence, expiry, IP, browser, then geo. The first failure wins.
    pub fn validate(&self, stored: Option<&SessionRecord>, current: &DeviceFingerprint, now: DateTime<Utc>) -> SecurityVerdict {
        let Some(session) = stored else {
            return SecurityVerdict::rejected(SessionRejection::SessionNotFound);
        };

        if session.is_expired_at(now) {
            return SecurityVerdict::rejected(SessionRejection::SessionExpired);
        }

        let original = &session.fingerprint;

        if !session.allow_ip_change && original.ip_address != current.ip_address {
            return SecurityVerdict::rejected(SessionRejection::IpMismatch);
        }

        if !session.allow_browser_change && !original.same_browser(current) {
            return SecurityVerdict::rejected(SessionRejection::DeviceMismatch);
        }

        // Compared against where the session was created, not the last request.
        if let (Some(from), Some(to)) = (&original.location, &current.location)
            && from.is_impossible_travel_between(to, session.created_at, now, self.max_travel_speed_kmh)
        {
            return SecurityVerdict::rejected(SessionRejection::SuspiciousLocation);
        }

        SecurityVerdict::valid()
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::GeoLocation;
    use crate::models::session::NewSession;
    use chrono::Duration;
    use uuid::Uuid;

    fn fingerprint(ip: &str, browser: &str, version: &str) -> DeviceFingerprint {
        DeviceFingerprint {
            ip_address: ip.to_string(),
            browser: browser.to_string(),
            browser_version: version.to_string(),
            ..DeviceFingerprint::default()
        }
    }

    fn located(mut fp: DeviceFingerprint, lat: f64, lon: f64) -> DeviceFingerprint {
        fp.location = Some(GeoLocation {
            country_code: "XX".to_string(),
            latitude: Some(lat),
            longitude: Some(lon),
            ..GeoLocation::default()
        });
        fp
    }

    fn session(fp: DeviceFingerprint, created_at: DateTime<Utc>, allow_ip_change: bool, allow_browser_change: bool) -> SessionRecord {
        let data = NewSession {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            company_id: None,
            tenant_roles: vec![],
            company_roles: vec![],
            permissions: vec![],
            fingerprint: fp,
            allow_ip_change,
            allow_browser_change,
        };
        SessionRecord::from_new("sess".to_string(), data, created_at, created_at + Duration::hours(8))
    }

    #[test]
    fn missing_session_is_not_found() {
        let verdict = SecurityValidator::default().validate(None, &DeviceFingerprint::default(), Utc::now());
        assert_eq!(verdict.reason, Some(SessionRejection::SessionNotFound));
    }

    #[test]
    fn expired_session_wins_over_ip_mismatch() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "120"), now - Duration::hours(9), false, false);
        let verdict = SecurityValidator::default().validate(Some(&stored), &fingerprint("2.2.2.2", "Chrome", "120"), now);
        assert_eq!(verdict.reason, Some(SessionRejection::SessionExpired));
    }

    #[test]
    fn ip_change_rejected_when_not_allowed() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "120"), now, false, false);
        let verdict = SecurityValidator::default().validate(Some(&stored), &fingerprint("2.2.2.2", "Chrome", "120"), now);
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, Some(SessionRejection::IpMismatch));
    }

    #[test]
    fn ip_change_allowed_by_policy() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "120"), now, true, false);
        let verdict = SecurityValidator::default().validate(Some(&stored), &fingerprint("2.2.2.2", "Chrome", "120.3"), now);
        assert!(verdict.valid);
    }

    #[test]
    fn browser_major_change_is_device_mismatch() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "114.0.1"), now, false, false);
        let validator = SecurityValidator::default();

        assert!(validator.validate(Some(&stored), &fingerprint("1.1.1.1", "Chrome", "114.2.9"), now).valid);
        assert_eq!(
            validator.validate(Some(&stored), &fingerprint("1.1.1.1", "Chrome", "115.0"), now).reason,
            Some(SessionRejection::DeviceMismatch)
        );
        assert_eq!(
            validator.validate(Some(&stored), &fingerprint("1.1.1.1", "Firefox", "114.0"), now).reason,
            Some(SessionRejection::DeviceMismatch)
        );
    }

    #[test]
    fn ip_checked_before_browser() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "114"), now, false, false);
        let verdict = SecurityValidator::default().validate(Some(&stored), &fingerprint("2.2.2.2", "Firefox", "1"), now);
        assert_eq!(verdict.reason, Some(SessionRejection::IpMismatch));
    }

    #[test]
    fn impossible_travel_is_suspicious() {
        let now = Utc::now();
        let created = now - Duration::hours(1);
        let stored = session(located(fingerprint("1.1.1.1", "Chrome", "120"), 0.0, 0.0), created, true, true);
        let far = located(fingerprint("1.1.1.1", "Chrome", "120"), 0.0, 9000.0 / 111.195);

        let verdict = SecurityValidator::default().validate(Some(&stored), &far, now);
        assert_eq!(verdict.reason, Some(SessionRejection::SuspiciousLocation));
    }

    #[test]
    fn slow_travel_is_fine() {
        let now = Utc::now();
        let created = now - Duration::hours(7) - Duration::minutes(59);
        let stored = session(located(fingerprint("1.1.1.1", "Chrome", "120"), 51.5, -0.12), created, true, true);
        // London to Paris is ~340 km
        let paris = located(fingerprint("1.1.1.1", "Chrome", "120"), 48.85, 2.35);

        assert!(SecurityValidator::default().validate(Some(&stored), &paris, now).valid);
    }

    #[test]
    fn geo_skipped_without_both_locations() {
        let now = Utc::now();
        let stored = session(fingerprint("1.1.1.1", "Chrome", "120"), now, true, true);
        let far = located(fingerprint("1.1.1.1", "Chrome", "120"), 0.0, 80.0);
        assert!(SecurityValidator::default().validate(Some(&stored), &far, now).valid);
    }
}
