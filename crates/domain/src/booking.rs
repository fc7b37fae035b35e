//! Booking input accepted by the payment-setup saga.

use common::{PartnerId, SlotId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;
use crate::order::{Address, CustomerIdentity, ServiceType, TimeWindow};

/// Everything needed to book one order and save its payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingParams {
    pub service_type: ServiceType,
    #[serde(rename = "estimated_amount_cents")]
    pub estimated_amount: Money,
    /// Gateway payment-method token collected by the client.
    pub payment_method_id: String,
    pub partner_id: PartnerId,
    pub pickup_slot_id: SlotId,
    pub pickup_window: TimeWindow,
    #[serde(default)]
    pub delivery_slot_id: Option<SlotId>,
    #[serde(default)]
    pub delivery_window: Option<TimeWindow>,
    pub address: Address,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    pub identity: CustomerIdentity,
}

/// Malformed booking input, reported before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("estimated amount must be positive, got {cents} cents")]
    InvalidAmount { cents: i64 },

    #[error("payment method token is missing or malformed")]
    InvalidPaymentMethod,

    #[error("address is missing {field}")]
    InvalidAddress { field: &'static str },

    #[error("guest contact is invalid: {reason}")]
    InvalidGuest { reason: &'static str },

    #[error("invalid schedule: {reason}")]
    InvalidSchedule { reason: &'static str },

    #[error("service details must be a JSON object")]
    InvalidDetails,
}

const MIN_PHONE_DIGITS: usize = 10;

impl BookingParams {
    /// Checks the input without touching any collaborator.
    pub fn validate(&self) -> Result<(), BookingError> {
        if !self.estimated_amount.is_positive() {
            return Err(BookingError::InvalidAmount {
                cents: self.estimated_amount.cents(),
            });
        }

        let token = self.payment_method_id.trim();
        if token.is_empty() || !token.starts_with("pm_") {
            return Err(BookingError::InvalidPaymentMethod);
        }

        if let Some(field) = self.address.missing_field() {
            return Err(BookingError::InvalidAddress { field });
        }

        if let Some(contact) = self.identity.guest_contact() {
            if contact.name.trim().is_empty() {
                return Err(BookingError::InvalidGuest {
                    reason: "name is required",
                });
            }
            if !is_plausible_email(&contact.email) {
                return Err(BookingError::InvalidGuest {
                    reason: "email is malformed",
                });
            }
            if digit_count(&contact.phone) < MIN_PHONE_DIGITS {
                return Err(BookingError::InvalidGuest {
                    reason: "phone needs at least 10 digits",
                });
            }
        }

        if let Some(phone) = &self.phone
            && digit_count(phone) < MIN_PHONE_DIGITS
        {
            return Err(BookingError::InvalidSchedule {
                reason: "contact phone needs at least 10 digits",
            });
        }

        self.validate_schedule()?;

        if !(self.details.is_object() || self.details.is_null()) {
            return Err(BookingError::InvalidDetails);
        }

        Ok(())
    }

    fn validate_schedule(&self) -> Result<(), BookingError> {
        if !self.pickup_window.is_valid() {
            return Err(BookingError::InvalidSchedule {
                reason: "pickup window ends before it starts",
            });
        }

        match (self.delivery_slot_id, self.delivery_window) {
            (None, None) => Ok(()),
            (Some(_), Some(window)) => {
                if self.service_type == ServiceType::Cleaning {
                    return Err(BookingError::InvalidSchedule {
                        reason: "cleaning bookings have no delivery",
                    });
                }
                if !window.is_valid() {
                    return Err(BookingError::InvalidSchedule {
                        reason: "delivery window ends before it starts",
                    });
                }
                if window.start < self.pickup_window.end {
                    return Err(BookingError::InvalidSchedule {
                        reason: "delivery must start after pickup ends",
                    });
                }
                Ok(())
            }
            _ => Err(BookingError::InvalidSchedule {
                reason: "delivery slot and window must be given together",
            }),
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn digit_count(phone: &str) -> usize {
    phone.chars().filter(char::is_ascii_digit).count()
}


#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{SlotId, UserId};

    use super::test_support::booking_params;
    use super::*;

    fn user_params() -> BookingParams {
        booking_params(ServiceType::Laundry, CustomerIdentity::user(UserId::new()))
    }

    #[test]
    fn test_valid_params_pass() {
        assert_eq!(user_params().validate(), Ok(()));
    }

    #[test]
    fn test_amount_must_be_positive() {
        let mut params = user_params();
        params.estimated_amount = Money::zero();
        assert_eq!(
            params.validate(),
            Err(BookingError::InvalidAmount { cents: 0 })
        );
    }

    #[test]
    fn test_payment_method_token_shape() {
        let mut params = user_params();
        params.payment_method_id = "tok_visa".into();
        assert_eq!(params.validate(), Err(BookingError::InvalidPaymentMethod));
    }

    #[test]
    fn test_guest_contact_checks() {
        let mut params = booking_params(
            ServiceType::Laundry,
            CustomerIdentity::guest("Ann", "ann@example.com", "(555) 123-4567"),
        );
        assert_eq!(params.validate(), Ok(()));

        params.identity = CustomerIdentity::guest("Ann", "ann-at-example.com", "5551234567");
        assert!(matches!(
            params.validate(),
            Err(BookingError::InvalidGuest { .. })
        ));

        params.identity = CustomerIdentity::guest("Ann", "ann@example.com", "555-1234");
        assert!(matches!(
            params.validate(),
            Err(BookingError::InvalidGuest { .. })
        ));
    }

    #[test]
    fn test_delivery_must_follow_pickup() {
        let mut params = user_params();
        let pickup = params.pickup_window;
        params.delivery_slot_id = Some(SlotId::new());
        params.delivery_window = Some(
            TimeWindow::new(pickup.start, pickup.start + Duration::hours(1)).unwrap(),
        );
        assert!(matches!(
            params.validate(),
            Err(BookingError::InvalidSchedule { .. })
        ));

        let delivery_start = pickup.end + Duration::days(1);
        params.delivery_window =
            Some(TimeWindow::new(delivery_start, delivery_start + Duration::hours(2)).unwrap());
        assert_eq!(params.validate(), Ok(()));
    }

    #[test]
    fn test_cleaning_has_no_delivery() {
        let mut params =
            booking_params(ServiceType::Cleaning, CustomerIdentity::user(UserId::new()));
        let pickup = params.pickup_window;
        params.delivery_slot_id = Some(SlotId::new());
        let delivery_start = pickup.end + Duration::days(1);
        params.delivery_window =
            Some(TimeWindow::new(delivery_start, delivery_start + Duration::days(1)).unwrap());
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_details_must_be_object() {
        let mut params = user_params();
        params.details = serde_json::json!([1, 2, 3]);
        assert_eq!(params.validate(), Err(BookingError::InvalidDetails));
    }

    #[test]
    fn test_wire_format_uses_cents_field() {
        let json = serde_json::to_value(user_params()).unwrap();
        assert_eq!(json["estimated_amount_cents"], 5000);
        assert_eq!(json["service_type"], "LAUNDRY");
        assert_eq!(json["identity"]["kind"], "user");
    }
}
