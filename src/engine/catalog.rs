use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::duration::resolve_duration;
use super::hours::validate_hours;
use super::{BookingError, Engine, Entity};

fn required_name(value: &str, what: &'static str) -> Result<String, BookingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BookingError::Validation(format!("{what} is required")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("name too long"));
    }
    Ok(value.to_string())
}

fn optional_text(value: Option<String>, max: usize, what: &'static str) -> Result<Option<String>, BookingError> {
    match value {
        Some(v) if v.len() > max => Err(BookingError::LimitExceeded(what)),
        Some(v) if v.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}

impl Engine {
    pub async fn register_business(
        &self,
        name: &str,
        password: &str,
        hours: OperatingHours,
    ) -> Result<Business, BookingError> {
        let name = required_name(name, "business name")?;
        if password.is_empty() {
            return Err(BookingError::Validation("password is required".into()));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(BookingError::LimitExceeded("password too long"));
        }
        validate_hours(&hours)?;

        let mut store = self.store.write().await;
        if store.business_count() >= MAX_BUSINESSES {
            return Err(BookingError::LimitExceeded("too many businesses"));
        }
        let business = Business {
            id: Ulid::new(),
            name,
            hours,
            password_hash: *blake3::hash(password.as_bytes()).as_bytes(),
            verified: false,
        };
        self.commit(&mut store, Event::BusinessRegistered { business: business.clone() })
            .await?;
        tracing::info!(business = %business.id, name = %business.name, "business registered");
        Ok(business)
    }

    pub async fn verify_business(&self, id: Ulid) -> Result<(), BookingError> {
        let mut store = self.store.write().await;
        let business = store.business(&id).ok_or(BookingError::NotFound(Entity::Business, id))?;
        if business.verified {
            return Ok(());
        }
        self.commit(&mut store, Event::BusinessVerified { id }).await?;
        tracing::info!(business = %id, "business verified");
        Ok(())
    }

    pub async fn set_operating_hours(&self, business_id: Ulid, hours: OperatingHours) -> Result<(), BookingError> {
        validate_hours(&hours)?;
        let mut store = self.store.write().await;
        store
            .business(&business_id)
            .ok_or(BookingError::NotFound(Entity::Business, business_id))?;
        self.commit(&mut store, Event::OperatingHoursSet { business_id, hours }).await?;
        tracing::info!(business = %business_id, ?hours, "operating hours updated");
        Ok(())
    }

    /// `decimal_hours` is the estimated service time, e.g. `1.5` for 1h30m.
    pub async fn add_service(
        &self,
        business_id: Ulid,
        name: &str,
        description: Option<String>,
        price: u64,
        decimal_hours: f64,
    ) -> Result<Service, BookingError> {
        let name = required_name(name, "service name")?;
        let description = optional_text(description, MAX_DESCRIPTION_LEN, "description too long")?;
        let duration = resolve_duration(decimal_hours)?;

        let mut store = self.store.write().await;
        store
            .business(&business_id)
            .ok_or(BookingError::NotFound(Entity::Business, business_id))?;
        if store.service_count(&business_id) >= MAX_SERVICES_PER_BUSINESS {
            return Err(BookingError::LimitExceeded("too many services for business"));
        }
        let service = Service {
            id: Ulid::new(),
            business_id,
            name,
            description,
            price,
            duration,
        };
        self.commit(&mut store, Event::ServiceAdded { service: service.clone() }).await?;
        tracing::info!(
            service = %service.id,
            business = %business_id,
            minutes = duration.minutes(),
            "service added"
        );
        Ok(service)
    }

    pub async fn add_staff(
        &self,
        business_id: Ulid,
        name: &str,
        role: Option<String>,
    ) -> Result<Staff, BookingError> {
        let name = required_name(name, "staff name")?;
        let role = optional_text(role, MAX_NAME_LEN, "role too long")?;

        let mut store = self.store.write().await;
        store
            .business(&business_id)
            .ok_or(BookingError::NotFound(Entity::Business, business_id))?;
        if store.staff_count(&business_id) >= MAX_STAFF_PER_BUSINESS {
            return Err(BookingError::LimitExceeded("too many staff for business"));
        }
        let staff = Staff {
            id: Ulid::new(),
            employer_id: business_id,
            name,
            role,
        };
        self.commit(&mut store, Event::StaffAdded { staff: staff.clone() }).await?;
        tracing::info!(staff = %staff.id, business = %business_id, "staff added");
        Ok(staff)
    }

    /// Appointments assigned to the staff member stay booked but lose the assignment.
    pub async fn remove_staff(&self, business_id: Ulid, staff_id: Ulid) -> Result<(), BookingError> {
        let mut store = self.store.write().await;
        let staff = store
            .staff(&staff_id)
            .ok_or(BookingError::NotFound(Entity::Staff, staff_id))?;
        if staff.employer_id != business_id {
            return Err(BookingError::Forbidden("staff does not belong to this business"));
        }
        self.commit(&mut store, Event::StaffRemoved { id: staff_id }).await?;
        tracing::info!(staff = %staff_id, business = %business_id, "staff removed");
        Ok(())
    }

    pub async fn add_availability_exception(
        &self,
        business_id: Ulid,
        staff_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<StaffAvailability, BookingError> {
        if start_time >= end_time {
            return Err(BookingError::Validation(
                "exception start time must be before end time".into(),
            ));
        }
        let mut store = self.store.write().await;
        let staff = store
            .staff(&staff_id)
            .ok_or(BookingError::NotFound(Entity::Staff, staff_id))?;
        if staff.employer_id != business_id {
            return Err(BookingError::Forbidden("staff does not belong to this business"));
        }
        if store.staff_exceptions(&staff_id).count() >= MAX_EXCEPTIONS_PER_STAFF {
            return Err(BookingError::LimitExceeded("too many availability exceptions for staff"));
        }
        let exception = StaffAvailability::new(Ulid::new(), staff_id, date, start_time, end_time);
        self.commit(&mut store, Event::ExceptionAdded { exception: exception.clone() })
            .await?;
        tracing::info!(
            exception = %exception.id,
            staff = %staff_id,
            %date,
            start = %start_time,
            end = %end_time,
            "availability exception added"
        );
        Ok(exception)
    }

    pub async fn remove_availability_exception(&self, business_id: Ulid, exception_id: Ulid) -> Result<(), BookingError> {
        let mut store = self.store.write().await;
        let exception = store
            .exception(&exception_id)
            .ok_or(BookingError::NotFound(Entity::Exception, exception_id))?;
        let owner = store.staff(&exception.staff_id).map(|s| s.employer_id);
        if owner != Some(business_id) {
            return Err(BookingError::Forbidden("exception belongs to another business"));
        }
        self.commit(&mut store, Event::ExceptionRemoved { id: exception_id }).await?;
        tracing::info!(exception = %exception_id, "availability exception removed");
        Ok(())
    }

    pub async fn register_client(&self, name: &str, email: &str, phone: &str) -> Result<Client, BookingError> {
        let name = required_name(name, "client name")?;
        let email = email.trim();
        if !email.contains('@') {
            return Err(BookingError::Validation("a valid email address is required".into()));
        }
        if email.len() > MAX_NAME_LEN || phone.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("contact details too long"));
        }
        let client = Client {
            id: Ulid::new(),
            name,
            email: email.to_string(),
            phone: phone.trim().to_string(),
        };
        let mut store = self.store.write().await;
        self.commit(&mut store, Event::ClientRegistered { client: client.clone() }).await?;
        tracing::info!(client = %client.id, "client registered");
        Ok(client)
    }
}
