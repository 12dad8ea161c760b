// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use coursepay_rs::{
    Course, CourseId, CourseStatus, Environment, FeeSchedule, GatewayCallback, InMemoryCatalog,
    Lesson, LessonId, Marketplace, MethodDetails, Module, ModuleId, PaymentTarget, ProgressDelta,
    SandboxGateway, UserId,
};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// CoursePay - Replay marketplace event CSV files
///
/// Loads a course catalog CSV, replays purchase/enrollment events against
/// the engine, and outputs enrollment states to stdout.
#[derive(Parser, Debug)]
#[command(name = "coursepay-rs")]
#[command(about = "A marketplace engine that replays catalog and event CSVs", long_about = None)]
struct Args {
    /// Path to catalog CSV defining courses, modules, and lessons
    ///
    /// Expected format: course,module,lesson,title,category,price,preview
    #[arg(value_name = "CATALOG")]
    catalog: PathBuf,

    /// Path to event CSV with marketplace events
    ///
    /// Expected format: type,user,course,module,lesson,amount,method,phone,code,reason
    #[arg(value_name = "EVENTS")]
    events: PathBuf,

    /// Output the payment report instead of the enrollment report
    #[arg(long)]
    payments: bool,
}

fn main() {
    let args = Args::parse();

    let catalog_file = match File::open(&args.catalog) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening catalog '{}': {}", args.catalog.display(), e);
            process::exit(1);
        }
    };
    let events_file = match File::open(&args.events) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening events '{}': {}", args.events.display(), e);
            process::exit(1);
        }
    };

    let mut replayer = match Replayer::from_catalog(BufReader::new(catalog_file)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error loading catalog: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = replayer.process_events(BufReader::new(events_file)) {
        eprintln!("Error processing events: {}", e);
        process::exit(1);
    }

    let result = if args.payments {
        write_payments(&replayer, std::io::stdout())
    } else {
        write_enrollments(&replayer, std::io::stdout())
    };
    if let Err(e) = result {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw catalog CSV record.
///
/// A row with only `course` set defines a course; `course` + `module`
/// defines a module; all three define a lesson.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    course: String,
    module: Option<String>,
    lesson: Option<String>,
    title: Option<String>,
    category: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    price: Option<Decimal>,
    #[serde(default)]
    preview: Option<bool>,
}

/// Raw event CSV record.
///
/// Fields: `type, user, course, module, lesson, amount, method, phone, code, reason`
#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "type")]
    event_type: String,
    user: String,
    course: Option<String>,
    module: Option<String>,
    lesson: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<Decimal>,
    method: Option<String>,
    phone: Option<String>,
    code: Option<String>,
    reason: Option<String>,
}

/// Replays CSV events against a [`Marketplace`], mapping the human-readable
/// slugs in the CSV onto engine identifiers.
pub struct Replayer {
    market: Marketplace,
    users: HashMap<String, UserId>,
    courses: HashMap<String, CourseId>,
    modules: HashMap<String, ModuleId>,
    lessons: HashMap<String, LessonId>,
    /// (user slug, target slug) -> transaction reference of the most
    /// recent payment, for callback correlation.
    references: HashMap<(String, String), String>,
    callback_seq: u64,
}

impl Replayer {
    /// Builds the catalog from a CSV reader.
    ///
    /// All courses are created `Published`; malformed rows are skipped.
    pub fn from_catalog<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let catalog = InMemoryCatalog::new();
        let mut courses: Vec<(String, Course)> = Vec::new();
        let mut modules: HashMap<String, ModuleId> = HashMap::new();
        let mut lessons: HashMap<String, LessonId> = HashMap::new();

        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        for result in rdr.deserialize::<CatalogRecord>() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping malformed catalog row: {}", e);
                    #[cfg(not(debug_assertions))]
                    let _ = e;
                    continue;
                }
            };

            let module_slug = record.module.as_deref().filter(|m| !m.is_empty());
            let lesson_slug = record.lesson.as_deref().filter(|l| !l.is_empty());

            match (module_slug, lesson_slug) {
                (None, _) => {
                    // Course definition row.
                    courses.push((
                        record.course.clone(),
                        Course {
                            id: CourseId::new(),
                            title: record.title.clone().unwrap_or_else(|| record.course.clone()),
                            category: record.category.clone().unwrap_or_default(),
                            price: record.price.unwrap_or(Decimal::ZERO),
                            currency: "MZN".to_string(),
                            status: CourseStatus::Published,
                            rating: 0.0,
                            enrollment_count: 0,
                            modules: Vec::new(),
                        },
                    ));
                }
                (Some(module_slug), None) => {
                    let Some((_, course)) = courses.iter_mut().find(|(s, _)| s == &record.course)
                    else {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping row for unknown course '{}'", record.course);
                        continue;
                    };
                    let module = Module {
                        id: ModuleId::new(),
                        title: record.title.clone().unwrap_or_else(|| module_slug.to_string()),
                        order: course.modules.len() as u32 + 1,
                        price: record.price.unwrap_or(Decimal::ZERO),
                        lessons: Vec::new(),
                    };
                    modules.insert(module_slug.to_string(), module.id);
                    course.modules.push(module);
                }
                (Some(module_slug), Some(lesson_slug)) => {
                    let Some(module_id) = modules.get(module_slug).copied() else {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping row for unknown module '{}'", module_slug);
                        continue;
                    };
                    let Some((_, course)) = courses.iter_mut().find(|(s, _)| s == &record.course)
                    else {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping row for unknown course '{}'", record.course);
                        continue;
                    };
                    let Some(module) = course.modules.iter_mut().find(|m| m.id == module_id)
                    else {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping row for unknown module '{}'", module_slug);
                        continue;
                    };
                    let lesson = Lesson {
                        id: LessonId::new(),
                        title: record.title.clone().unwrap_or_else(|| lesson_slug.to_string()),
                        order: module.lessons.len() as u32 + 1,
                        is_preview: record.preview.unwrap_or(false),
                    };
                    lessons.insert(lesson_slug.to_string(), lesson.id);
                    module.lessons.push(lesson);
                }
            }
        }

        let course_index: HashMap<String, CourseId> =
            courses.iter().map(|(slug, c)| (slug.clone(), c.id)).collect();
        for (_, course) in courses {
            catalog.insert_course(course);
        }

        let market = Marketplace::new(
            Arc::new(catalog),
            Arc::new(SandboxGateway::new()),
            FeeSchedule::default(),
            Environment::Sandbox,
        );

        Ok(Self {
            market,
            users: HashMap::new(),
            courses: course_index,
            modules,
            lessons,
            references: HashMap::new(),
            callback_seq: 0,
        })
    }

    /// Replays events from a CSV reader.
    ///
    /// Streaming parse in the engine's skip-invalid style: malformed rows
    /// and failed events are logged in debug mode and do not stop
    /// processing. The outbox is dispatched after every event so grants and
    /// certificates land before the next row.
    pub fn process_events<R: Read>(&mut self, reader: R) -> Result<(), csv::Error> {
        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        for result in rdr.deserialize::<EventRecord>() {
            match result {
                Ok(record) => {
                    if let Err(e) = self.apply(record) {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping event: {}", e);
                        #[cfg(not(debug_assertions))]
                        let _ = e;
                    }
                    self.market.dispatch_pending();
                }
                Err(e) => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping malformed row: {}", e);
                    #[cfg(not(debug_assertions))]
                    let _ = e;
                    continue;
                }
            }
        }

        Ok(())
    }

    pub fn market(&self) -> &Marketplace {
        &self.market
    }

    fn user(&mut self, slug: &str) -> UserId {
        *self
            .users
            .entry(slug.to_string())
            .or_insert_with(UserId::new)
    }

    fn apply(&mut self, record: EventRecord) -> Result<(), String> {
        let user_id = self.user(&record.user);

        match record.event_type.to_lowercase().as_str() {
            "enroll" => {
                let course_id = self.course_id(&record)?;
                self.market
                    .enrollments()
                    .enroll(user_id, course_id)
                    .map_err(|e| e.to_string())?;
            }
            "pay" | "topup" => {
                let (target, target_slug) = if record.event_type.eq_ignore_ascii_case("topup") {
                    (PaymentTarget::WalletTopUp, "wallet".to_string())
                } else if let Some(course) = record.course.as_ref().filter(|c| !c.is_empty()) {
                    (PaymentTarget::Course(self.course_id(&record)?), course.clone())
                } else if let Some(module) = record.module.as_ref().filter(|m| !m.is_empty()) {
                    let module_id = self
                        .modules
                        .get(module)
                        .copied()
                        .ok_or_else(|| format!("unknown module '{}'", module))?;
                    (PaymentTarget::Module(module_id), module.clone())
                } else {
                    return Err("pay event needs a course or module".to_string());
                };

                let amount = record.amount.ok_or("pay event needs an amount")?;
                let details = match record.method.as_deref() {
                    Some("mpesa") | Some("mobile_money") | None => MethodDetails::MobileMoney {
                        phone_number: record
                            .phone
                            .clone()
                            .unwrap_or_else(|| "841234567".to_string()),
                    },
                    Some("card") => MethodDetails::Card,
                    Some("wallet") => MethodDetails::Wallet,
                    Some(other) => return Err(format!("unknown method '{}'", other)),
                };

                let payment = self
                    .market
                    .payments()
                    .create_payment(user_id, target, amount, &details)
                    .map_err(|e| e.to_string())?;
                if payment.method == coursepay_rs::PaymentMethod::MobileMoney {
                    self.market
                        .payments()
                        .initiate_mobile_money(payment.id, user_id)
                        .map_err(|e| e.to_string())?;
                }
                self.references
                    .insert((record.user.clone(), target_slug), payment.reference);
            }
            "callback" => {
                let target_slug = record
                    .course
                    .as_ref()
                    .or(record.module.as_ref())
                    .filter(|s| !s.is_empty())
                    .ok_or("callback event needs a course or module")?;
                let reference = self
                    .references
                    .get(&(record.user.clone(), target_slug.clone()))
                    .cloned()
                    .ok_or_else(|| format!("no payment to correlate for '{}'", target_slug))?;

                self.callback_seq += 1;
                let callback = GatewayCallback {
                    response_code: record.code.clone().unwrap_or_else(|| "INS-0".to_string()),
                    transaction_id: format!("MPESA{:08}", self.callback_seq),
                    response_desc: record.reason.clone().unwrap_or_default(),
                    reference,
                    signed_data: None,
                };
                self.market
                    .payments()
                    .confirm_gateway_callback(&callback)
                    .map_err(|e| e.to_string())?;
            }
            "progress" => {
                let course_id = self.course_id(&record)?;
                let lesson_slug = record
                    .lesson
                    .as_ref()
                    .filter(|l| !l.is_empty())
                    .ok_or("progress event needs a lesson")?;
                let lesson_id = self
                    .lessons
                    .get(lesson_slug)
                    .copied()
                    .ok_or_else(|| format!("unknown lesson '{}'", lesson_slug))?;
                let enrollment = self
                    .market
                    .enrollments()
                    .enrollments_for(user_id)
                    .into_iter()
                    .find(|e| e.course_id == course_id)
                    .ok_or_else(|| format!("'{}' is not enrolled", record.user))?;

                self.market
                    .enrollments()
                    .update_progress(enrollment.id, user_id, lesson_id, &ProgressDelta::default())
                    .map_err(|e| e.to_string())?;
            }
            "refund" => {
                let target_slug = record
                    .course
                    .as_ref()
                    .or(record.module.as_ref())
                    .filter(|s| !s.is_empty())
                    .ok_or("refund event needs a course or module")?;
                let reference = self
                    .references
                    .get(&(record.user.clone(), target_slug.clone()))
                    .cloned()
                    .ok_or_else(|| format!("no payment to refund for '{}'", target_slug))?;
                let payment = self
                    .market
                    .payments()
                    .user_payments(user_id, None)
                    .into_iter()
                    .find(|p| p.reference == reference)
                    .ok_or("payment record missing")?;

                self.market
                    .payments()
                    .refund(
                        payment.id,
                        record.reason.as_deref().unwrap_or("requested"),
                        user_id,
                    )
                    .map_err(|e| e.to_string())?;
            }
            other => return Err(format!("unknown event type '{}'", other)),
        }

        Ok(())
    }

    fn course_id(&self, record: &EventRecord) -> Result<CourseId, String> {
        let slug = record
            .course
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or("event needs a course")?;
        self.courses
            .get(slug)
            .copied()
            .ok_or_else(|| format!("unknown course '{}'", slug))
    }

    fn slug_for_user(&self, user_id: UserId) -> String {
        self.users
            .iter()
            .find(|(_, id)| **id == user_id)
            .map(|(slug, _)| slug.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    fn slug_for_course(&self, course_id: CourseId) -> String {
        self.courses
            .iter()
            .find(|(_, id)| **id == course_id)
            .map(|(slug, _)| slug.clone())
            .unwrap_or_else(|| course_id.to_string())
    }
}

/// Enrollment report row.
#[derive(Debug, Serialize)]
struct EnrollmentRow {
    user: String,
    course: String,
    status: String,
    progress: Decimal,
    lessons_completed: usize,
    amount_paid: Decimal,
    certified: bool,
}

/// Payment report row.
#[derive(Debug, Serialize)]
struct PaymentRow {
    user: String,
    reference: String,
    status: String,
    amount: Decimal,
    fee: Decimal,
    tax: Decimal,
    total: Decimal,
}

/// Writes enrollment states as CSV, two decimal places of progress.
pub fn write_enrollments<W: Write>(replayer: &Replayer, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut enrollments = replayer.market.enrollments().all();
    enrollments.sort_by_key(|e| e.enrolled_at);
    for enrollment in enrollments {
        wtr.serialize(EnrollmentRow {
            user: replayer.slug_for_user(enrollment.user_id),
            course: replayer.slug_for_course(enrollment.course_id),
            status: enrollment.status.to_string(),
            progress: enrollment.progress.round_dp(2),
            lessons_completed: enrollment.completed_lessons.len(),
            amount_paid: enrollment.amount_paid.round_dp(2),
            certified: enrollment.certificate_id.is_some(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes payment states as CSV with derived fee/tax/total columns.
pub fn write_payments<W: Write>(replayer: &Replayer, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut payments = replayer.market.payments().all();
    payments.sort_by_key(|p| p.created_at);
    for payment in payments {
        wtr.serialize(PaymentRow {
            user: replayer.slug_for_user(payment.user_id),
            reference: payment.reference.clone(),
            status: payment.status.to_string(),
            amount: payment.amount.round_dp(2),
            fee: payment.fee.round_dp(2),
            tax: payment.tax.round_dp(2),
            total: payment.total_amount().round_dp(2),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
