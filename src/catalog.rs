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

//! Course catalog collaborator.
//!
//! The payment processor and enrollment manager consult the catalog for
//! prices, publication status, and lesson counts. The catalog itself is an
//! external system from the engine's point of view; [`Catalog`] is the seam
//! and [`InMemoryCatalog`] the in-process implementation used by the binary,
//! the demo server, and the tests.

use crate::base::{CourseId, LessonId, ModuleId};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Publication state of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Published => "published",
            CourseStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// A single lesson within a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    pub order: u32,
    /// Preview lessons are accessible without an enrollment.
    pub is_preview: bool,
}

/// A module groups lessons and may be purchasable on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub title: String,
    pub order: u32,
    pub price: Decimal,
    pub lessons: Vec<Lesson>,
}

/// A course owns its modules and lessons (cascade semantics: removing the
/// course removes everything beneath it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub category: String,
    pub price: Decimal,
    pub currency: String,
    pub status: CourseStatus,
    pub rating: f32,
    pub enrollment_count: u32,
    pub modules: Vec<Module>,
}

impl Course {
    /// Total lesson count across all modules.
    ///
    /// This is the denominator for enrollment progress.
    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn is_published(&self) -> bool {
        self.status == CourseStatus::Published
    }
}

/// A module looked up through the catalog, with its owning course context.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub module: Module,
    pub course_id: CourseId,
    pub currency: String,
}

/// A lesson looked up through the catalog, with its owning course.
#[derive(Debug, Clone)]
pub struct LessonRef {
    pub lesson: Lesson,
    pub course_id: CourseId,
}

/// Listing filter.
///
/// The status filter defaults to [`CourseStatus::Published`] — listings
/// never show draft or archived courses unless a caller asks for them
/// by name.
#[derive(Debug, Clone)]
pub struct CourseFilter {
    pub status: CourseStatus,
    pub category: Option<String>,
}

impl Default for CourseFilter {
    fn default() -> Self {
        Self {
            status: CourseStatus::Published,
            category: None,
        }
    }
}

/// Read interface onto the course catalog.
pub trait Catalog: Send + Sync {
    /// Looks up a course with its full module/lesson tree.
    fn course(&self, id: &CourseId) -> Option<Course>;

    /// Looks up a module together with its owning course id and currency.
    fn module(&self, id: &ModuleId) -> Option<ModuleRef>;

    /// Looks up a lesson together with its owning course id.
    fn lesson(&self, id: &LessonId) -> Option<LessonRef>;

    /// Lists courses matching the filter, newest rating first.
    fn list(&self, filter: &CourseFilter) -> Vec<Course>;

    /// Published courses ranked by enrollment count, then rating.
    fn popular(&self, limit: usize) -> Vec<Course>;

    /// Published courses in the given categories ranked by rating.
    fn published_in_categories(&self, categories: &[String], limit: usize) -> Vec<Course>;
}

/// In-process catalog backed by concurrent maps.
///
/// Module and lesson ids are indexed to their owning course so price and
/// access checks stay O(1).
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    courses: DashMap<CourseId, Course>,
    module_index: DashMap<ModuleId, CourseId>,
    lesson_index: DashMap<LessonId, CourseId>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a course and refreshes the child indexes.
    pub fn insert_course(&self, course: Course) {
        for module in &course.modules {
            self.module_index.insert(module.id, course.id);
            for lesson in &module.lessons {
                self.lesson_index.insert(lesson.id, course.id);
            }
        }
        self.courses.insert(course.id, course);
    }

    fn ranked(mut courses: Vec<Course>, by_enrollment: bool) -> Vec<Course> {
        courses.sort_by(|a, b| {
            let primary = if by_enrollment {
                b.enrollment_count.cmp(&a.enrollment_count)
            } else {
                Ordering::Equal
            };
            primary.then(b.rating.partial_cmp(&a.rating).unwrap_or(Ordering::Equal))
        });
        courses
    }
}

impl Catalog for InMemoryCatalog {
    fn course(&self, id: &CourseId) -> Option<Course> {
        self.courses.get(id).map(|c| c.clone())
    }

    fn module(&self, id: &ModuleId) -> Option<ModuleRef> {
        let course_id = *self.module_index.get(id)?;
        let course = self.courses.get(&course_id)?;
        let module = course.modules.iter().find(|m| m.id == *id)?.clone();
        Some(ModuleRef {
            module,
            course_id,
            currency: course.currency.clone(),
        })
    }

    fn lesson(&self, id: &LessonId) -> Option<LessonRef> {
        let course_id = *self.lesson_index.get(id)?;
        let course = self.courses.get(&course_id)?;
        let lesson = course
            .modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .find(|l| l.id == *id)?
            .clone();
        Some(LessonRef { lesson, course_id })
    }

    fn list(&self, filter: &CourseFilter) -> Vec<Course> {
        let courses = self
            .courses
            .iter()
            .filter(|c| c.status == filter.status)
            .filter(|c| {
                filter
                    .category
                    .as_ref()
                    .is_none_or(|cat| &c.category == cat)
            })
            .map(|c| c.clone())
            .collect();
        Self::ranked(courses, false)
    }

    fn popular(&self, limit: usize) -> Vec<Course> {
        let courses = self
            .courses
            .iter()
            .filter(|c| c.is_published())
            .map(|c| c.clone())
            .collect();
        let mut ranked = Self::ranked(courses, true);
        ranked.truncate(limit);
        ranked
    }

    fn published_in_categories(&self, categories: &[String], limit: usize) -> Vec<Course> {
        let courses = self
            .courses
            .iter()
            .filter(|c| c.is_published() && categories.contains(&c.category))
            .map(|c| c.clone())
            .collect();
        let mut ranked = Self::ranked(courses, false);
        ranked.truncate(limit);
        ranked
    }
}
