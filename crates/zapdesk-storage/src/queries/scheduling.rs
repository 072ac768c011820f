// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Services, professionals and appointments.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{
    Appointment, AppointmentStatus, BookedSlot, NewAppointment, Professional, Service,
};
use zapdesk_core::types::{ContactId, TenantId};

use crate::database::{Database, map_tr_err};
use crate::queries::get_enum;

const APPOINTMENT_COLUMNS: &str = "id, tenant_id, contact_id, ticket_id, service_id,
    professional_id, date, time, duration_minutes, status, created_at";

fn row_to_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        contact_id: row.get(2)?,
        ticket_id: row.get(3)?,
        service_id: row.get(4)?,
        professional_id: row.get(5)?,
        date: row.get(6)?,
        time: row.get(7)?,
        duration_minutes: row.get(8)?,
        status: get_enum(row, 9)?,
        created_at: row.get(10)?,
    })
}

pub use zapdesk_core::models::{minutes_of, overlaps};

pub async fn list_services(db: &Database, tenant_id: TenantId) -> Result<Vec<Service>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, name, duration_minutes FROM services
                 WHERE tenant_id = ?1 ORDER BY name ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![tenant_id], |row| {
                Ok(Service {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    duration_minutes: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_professionals(
    db: &Database,
    tenant_id: TenantId,
    service_id: i64,
) -> Result<Vec<Professional>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.tenant_id, p.name, p.work_start, p.work_end, p.work_days
                 FROM professionals p
                 JOIN professional_services ps ON ps.professional_id = p.id
                 WHERE p.tenant_id = ?1 AND ps.service_id = ?2
                 ORDER BY p.name ASC, p.id ASC",
            )?;
            let rows = stmt.query_map(params![tenant_id, service_id], |row| {
                Ok(Professional {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    work_start: row.get(3)?,
                    work_end: row.get(4)?,
                    work_days: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

fn query_booked(
    conn: &rusqlite::Connection,
    professional_id: i64,
    date: &str,
) -> rusqlite::Result<Vec<BookedSlot>> {
    let mut stmt = conn.prepare(
        "SELECT time, duration_minutes FROM appointments
         WHERE professional_id = ?1 AND date = ?2 AND status != 'cancelled'
         ORDER BY time ASC",
    )?;
    let rows = stmt.query_map(params![professional_id, date], |row| {
        Ok(BookedSlot {
            time: row.get(0)?,
            duration_minutes: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub async fn booked_slots(
    db: &Database,
    professional_id: i64,
    date: &str,
) -> Result<Vec<BookedSlot>, ZapdeskError> {
    let date = date.to_string();
    db.connection()
        .call(move |conn| query_booked(conn, professional_id, &date))
        .await
        .map_err(map_tr_err)
}

/// Re-checks the slot, inserts a pending row and confirms it, all inside one
/// transaction. A taken slot yields [`ZapdeskError::Conflict`].
pub async fn book_appointment(
    db: &Database,
    appointment: &NewAppointment,
    now: DateTime<Utc>,
) -> Result<Appointment, ZapdeskError> {
    let a = appointment.clone();
    let start = minutes_of(&a.time)
        .ok_or_else(|| ZapdeskError::Validation(format!("invalid time `{}`", a.time)))?;

    let booked = db
        .connection()
        .call(move |conn| -> Result<Option<Appointment>, rusqlite::Error> {
            let tx = conn.transaction()?;
            if overlaps(&query_booked(&tx, a.professional_id, &a.date)?, start, a.duration_minutes)
            {
                return Ok(None);
            }
            tx.execute(
                "INSERT INTO appointments (tenant_id, contact_id, ticket_id, service_id,
                    professional_id, date, time, duration_minutes, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    a.tenant_id,
                    a.contact_id,
                    a.ticket_id,
                    a.service_id,
                    a.professional_id,
                    a.date,
                    a.time,
                    a.duration_minutes,
                    AppointmentStatus::Pending.to_string(),
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE appointments SET status = ?1 WHERE id = ?2",
                params![AppointmentStatus::Confirmed.to_string(), id],
            )?;
            let stored = tx.query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                params![id],
                row_to_appointment,
            )?;
            tx.commit()?;
            Ok(Some(stored))
        })
        .await
        .map_err(map_tr_err)?;

    booked.ok_or_else(|| {
        ZapdeskError::Conflict(format!(
            "professional {} is already booked at {} {}",
            appointment.professional_id, appointment.date, appointment.time
        ))
    })
}

pub async fn list_upcoming_appointments(
    db: &Database,
    tenant_id: TenantId,
    contact_id: ContactId,
    from_date: &str,
) -> Result<Vec<Appointment>, ZapdeskError> {
    let from_date = from_date.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE tenant_id = ?1 AND contact_id = ?2 AND date >= ?3 AND status != 'cancelled'
                 ORDER BY date ASC, time ASC"
            ))?;
            let rows = stmt.query_map(params![tenant_id, contact_id, from_date], row_to_appointment)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn cancel_appointment(
    db: &Database,
    tenant_id: TenantId,
    appointment_id: i64,
) -> Result<bool, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE appointments SET status = 'cancelled'
                 WHERE tenant_id = ?1 AND id = ?2 AND status != 'cancelled'",
                params![tenant_id, appointment_id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_appointment(
    db: &Database,
    appointment_id: i64,
) -> Result<Option<Appointment>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                params![appointment_id],
                row_to_appointment,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::catalog;
    use tempfile::tempdir;

    #[test]
    fn minutes_and_overlap() {
        assert_eq!(minutes_of("09:30"), Some(570));
        assert_eq!(minutes_of("24:00"), None);
        assert_eq!(minutes_of("nope"), None);
        let booked = vec![BookedSlot {
            time: "10:00".into(),
            duration_minutes: 60,
        }];
        assert!(overlaps(&booked, 10 * 60 + 30, 30));
        assert!(overlaps(&booked, 9 * 60 + 30, 60));
        assert!(!overlaps(&booked, 11 * 60, 30));
        assert!(!overlaps(&booked, 9 * 60, 60));
    }

    async fn setup() -> (Database, tempfile::TempDir, i64, i64) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        let service = catalog::insert_service(&db, 1, "Corte", 30).await.unwrap();
        let prof = catalog::insert_professional(&db, 1, "Ana", "09:00", "18:00", "1,2,3,4,5", &[service])
            .await
            .unwrap();
        (db, dir, service, prof)
    }

    fn new_appt(service: i64, prof: i64, time: &str) -> NewAppointment {
        NewAppointment {
            tenant_id: 1,
            contact_id: 7,
            ticket_id: None,
            service_id: service,
            professional_id: prof,
            date: "2026-10-19".into(),
            time: time.into(),
            duration_minutes: 30,
        }
    }

    #[tokio::test]
    async fn booking_confirms_and_rejects_overlap() {
        let (db, _dir, service, prof) = setup().await;
        let appt = book_appointment(&db, &new_appt(service, prof, "10:00"), Utc::now()).await.unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);

        let err = book_appointment(&db, &new_appt(service, prof, "10:15"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ZapdeskError::Conflict(_)));

        assert_eq!(booked_slots(&db, prof, "2026-10-19").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_slot_can_be_rebooked() {
        let (db, _dir, service, prof) = setup().await;
        let appt = book_appointment(&db, &new_appt(service, prof, "14:00"), Utc::now()).await.unwrap();
        assert!(cancel_appointment(&db, 1, appt.id).await.unwrap());
        assert!(!cancel_appointment(&db, 1, appt.id).await.unwrap());

        book_appointment(&db, &new_appt(service, prof, "14:00"), Utc::now()).await.unwrap();
        let upcoming = list_upcoming_appointments(&db, 1, 7, "2026-10-01").await.unwrap();
        assert_eq!(upcoming.len(), 1);
    }

    #[tokio::test]
    async fn professionals_filtered_by_service() {
        let (db, _dir, service, prof) = setup().await;
        let other = catalog::insert_service(&db, 1, "Barba", 15).await.unwrap();
        assert_eq!(
            list_professionals(&db, 1, service).await.unwrap().iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![prof]
        );
        assert!(list_professionals(&db, 1, other).await.unwrap().is_empty());
        assert_eq!(list_services(&db, 1).await.unwrap().len(), 2);
    }
}
