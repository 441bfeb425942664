//! Hospital appointment polling and slot alerts.
//!
//! Each reservation profile tracks a set of doctors; every poll asks the
//! scheduling RPC for their open slots, filters out departments we don't
//! want, slots over budget, and fully-booked slots, then pushes one card
//! per remaining slot. The slot identity is the dedup key, so one physical
//! slot alerts at most the profile's repeat budget before going quiet.

use serde::Deserialize;

use crate::config::ReserveProfile;
use crate::gate::{NotifyBudget, NotifyGate};
use crate::notify::{Notifier, TextCard};
use crate::types::AlertKey;

const SCHEDULING_API_BASE: &str = "https://api.cmsfg.com";

#[derive(Debug, Deserialize)]
struct SchedulingResponse {
    result: Option<SchedulingResult>,
}

#[derive(Debug, Deserialize)]
struct SchedulingResult {
    #[serde(rename = "Doctor")]
    doctor: DoctorInfo,
    #[serde(rename = "AppointmentScheduling", default)]
    days: Vec<AppointmentDay>,
}

#[derive(Debug, Clone, Deserialize)]
struct DoctorInfo {
    #[serde(rename = "DoctorName", default)]
    name: String,
    #[serde(rename = "DoctorLevelName", default)]
    level_name: String,
}

#[derive(Debug, Deserialize)]
struct AppointmentDay {
    #[serde(rename = "Schedulings", default)]
    schedulings: Vec<SlotInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlotInfo {
    #[serde(rename = "CanAppointment", default)]
    can_appointment: i64,
    #[serde(rename = "Appointment", default)]
    appointment: i64,
    #[serde(rename = "DeptCode", default)]
    dept_code: String,
    #[serde(rename = "Price", default)]
    price: f64,
    #[serde(rename = "Date", default)]
    date: String,
    #[serde(rename = "StartTime", default)]
    start_time: String,
    #[serde(rename = "EndTime", default)]
    end_time: String,
    #[serde(rename = "Location", default)]
    location: String,
}

/// Poll every configured profile once.
///
/// A fetch or parse failure for one doctor skips that doctor only; the
/// rest of the pass continues.
pub async fn reserve_notify(
    client: &reqwest::Client,
    profiles: &[ReserveProfile],
    gate: &NotifyGate,
    notifier: &dyn Notifier,
) {
    for profile in profiles {
        let dept_codes = ReserveProfile::split_csv(&profile.dept_codes);
        let doctor_work_nums = ReserveProfile::split_csv(&profile.doctor_work_nums);
        if doctor_work_nums.is_empty() {
            log::debug!("reserve profile {} has no doctors configured", profile.app_id);
            continue;
        }

        for doctor_work_num in &doctor_work_nums {
            let Some(result) = poll_doctor(client, profile, doctor_work_num).await else {
                continue;
            };
            let slots = eligible_slots(&result, &dept_codes, profile.price_limit);
            notify_slots(&slots, &result.doctor, doctor_work_num, profile, gate, notifier).await;
        }
    }
    log::debug!("reserve notify pass done");
}

async fn poll_doctor(
    client: &reqwest::Client,
    profile: &ReserveProfile,
    doctor_work_num: &str,
) -> Option<SchedulingResult> {
    let app_id = profile.app_id;
    let url = format!("{SCHEDULING_API_BASE}/api/appointment/Scheduling?AppId={app_id}");
    let payload = serde_json::json!({
        "method": "GetScheduling",
        "params": [{
            "AppId": app_id,
            "DoctorWorkNum": doctor_work_num,
            "RegisterType": profile.register_type,
            "AppointmentType": profile.appointment_type,
        }],
    });

    // the RPC rejects calls without browser-shaped headers
    let response = client
        .post(&url)
        .header("Origin", SCHEDULING_API_BASE)
        .header(
            "Referer",
            format!("{SCHEDULING_API_BASE}/app/hospital/{app_id}/index.html?state={app_id}"),
        )
        .header(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/120.0.0.0 Safari/537.36",
        )
        .json(&payload)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            log::warn!("scheduling fetch failed for doctor {doctor_work_num}: {e:#}");
            return None;
        }
    };
    if !response.status().is_success() {
        log::warn!(
            "scheduling fetch for doctor {doctor_work_num} returned {}",
            response.status()
        );
        return None;
    }
    match response.json::<SchedulingResponse>().await {
        Ok(parsed) => match parsed.result {
            Some(result) => Some(result),
            None => {
                log::warn!("scheduling payload for doctor {doctor_work_num} missing result");
                None
            }
        },
        Err(e) => {
            log::warn!("scheduling payload unreadable for doctor {doctor_work_num}: {e:#}");
            None
        }
    }
}

/// Keep only slots in an allowed department, within budget, with capacity
/// left.
fn eligible_slots(
    result: &SchedulingResult,
    dept_codes: &[String],
    price_limit: f64,
) -> Vec<SlotInfo> {
    let mut eligible = Vec::new();
    for day in &result.days {
        for slot in &day.schedulings {
            if !dept_codes.iter().any(|code| code == &slot.dept_code) {
                log::info!("skipping slot in unwatched department {}", slot.dept_code);
                continue;
            }
            if slot.price > price_limit {
                log::info!("skipping slot over budget, price {}", slot.price);
                continue;
            }
            if slot.can_appointment - slot.appointment <= 0 {
                log::info!(
                    "slot full, capacity {} booked {}",
                    slot.can_appointment,
                    slot.appointment
                );
                continue;
            }
            eligible.push(slot.clone());
        }
    }
    eligible
}

async fn notify_slots(
    slots: &[SlotInfo],
    doctor: &DoctorInfo,
    doctor_work_num: &str,
    profile: &ReserveProfile,
    gate: &NotifyGate,
    notifier: &dyn Notifier,
) {
    let budget = NotifyBudget {
        max_repeats: profile.duplicate_notify_times,
        window_secs: profile.duplicate_notify_time_limit,
    };
    for slot in slots {
        let key = AlertKey::Composite(slot_key(doctor_work_num, slot));
        let card = slot_card(slot, doctor, doctor_work_num, profile);
        gate.deliver(&key, &card, &budget, notifier).await;
    }
}

/// Slot identity: one physical appointment window for one doctor.
fn slot_key(doctor_work_num: &str, slot: &SlotInfo) -> String {
    format!(
        "{}#{}#{}#{}#{}",
        doctor_work_num, slot.dept_code, slot.date, slot.start_time, slot.end_time
    )
}

fn slot_card(
    slot: &SlotInfo,
    doctor: &DoctorInfo,
    doctor_work_num: &str,
    profile: &ReserveProfile,
) -> TextCard {
    let app_id = profile.app_id;
    let today = chrono::Local::now().format("%Y-%m-%d");
    TextCard {
        title: "Appointment slot available".to_string(),
        description: format!(
            "Date: <div class=\"highlight\">{}</div>\
             Start: <div class=\"highlight\">{}</div>\
             End: <div class=\"highlight\">{}</div>\
             Location: <div class=\"highlight\">{}</div>\
             Price: <div class=\"highlight\">{}</div>\
             Doctor: <div class=\"highlight\">{}</div>\
             Title: <div class=\"highlight\">{}</div>\
             Booked: {}/{}",
            slot.date,
            slot.start_time,
            slot.end_time,
            slot.location,
            slot.price,
            doctor.name,
            doctor.level_name,
            slot.appointment,
            slot.can_appointment
        ),
        url: format!(
            "{SCHEDULING_API_BASE}/app/hospital/{app_id}/index.html?state={app_id}\
             #/DoctorSchedule?AppId={app_id}&DeptCode={}&RegisterType={}&AppointmentType={}\
             &Date={today}&DoctorWorkNum={doctor_work_num}",
            slot.dept_code, profile.register_type, profile.appointment_type
        ),
    }
}
