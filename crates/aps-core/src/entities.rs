//! Named reference entities: items, locations, customers, suppliers,
//! skills and the item-supplier purchasing relation.
//!
//! Each of these forms a tree through an optional owner reference. The
//! arena owns every node; parent/child edges are ids.

use crate::dates::DateRange;
use crate::{CalendarId, CustomerId, ItemId, LocationId, OperationId, ResourceId, SupplierId};
use chrono::Duration;

/// A product being planned, sold, stored or manufactured.
#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<ItemId>,
    pub members: Vec<ItemId>,
    /// Selling price per unit. Default 0.
    pub price: f64,
    /// Operation used to satisfy a demand for this item. Inherited
    /// from the owner chain when unset.
    pub delivery_operation: Option<OperationId>,
    pub hidden: bool,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Item {
            name: name.into(),
            description: None,
            owner: None,
            members: Vec::new(),
            price: 0.0,
            delivery_operation: None,
            hidden: false,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }
}

/// A physical or logical place buffers, resources and operations live
/// at. The availability calendar models working hours and holidays.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<LocationId>,
    pub members: Vec<LocationId>,
    pub available: Option<CalendarId>,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Location {
            name: name.into(),
            description: None,
            owner: None,
            members: Vec::new(),
            available: None,
        }
    }

    pub fn with_available(mut self, cal: CalendarId) -> Self {
        self.available = Some(cal);
        self
    }
}

/// A customer placing demands. No planning behavior of its own.
#[derive(Debug, Clone)]
pub struct Customer {
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<CustomerId>,
    pub members: Vec<CustomerId>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Customer {
            name: name.into(),
            description: None,
            owner: None,
            members: Vec::new(),
        }
    }
}

/// An external source of purchased material.
#[derive(Debug, Clone)]
pub struct Supplier {
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<SupplierId>,
    pub members: Vec<SupplierId>,
}

impl Supplier {
    pub fn new(name: impl Into<String>) -> Self {
        Supplier {
            name: name.into(),
            description: None,
            owner: None,
            members: Vec::new(),
        }
    }
}

/// A capability resources can carry and loads can require.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    /// Resources having this skill.
    pub resources: Vec<ResourceId>,
}

impl Skill {
    pub fn new(name: impl Into<String>) -> Self {
        Skill {
            name: name.into(),
            resources: Vec::new(),
        }
    }
}

/// Defines that an item can be purchased from a supplier. Buffers
/// without a producing operation derive a synthetic purchase operation
/// from these relations.
#[derive(Debug, Clone)]
pub struct ItemSupplier {
    pub supplier: SupplierId,
    pub item: ItemId,
    /// Restricts the relation to buffers at this location when set.
    pub location: Option<LocationId>,
    /// Purchasing leadtime, the duration of the derived operation.
    pub leadtime: Duration,
    pub size_minimum: f64,
    pub size_multiple: f64,
    /// Purchasing cost per unit.
    pub cost: f64,
    pub effective: DateRange,
    /// Lower numbers are preferred. Default 1.
    pub priority: i32,
}

impl ItemSupplier {
    pub fn new(supplier: SupplierId, item: ItemId, leadtime: Duration) -> Self {
        ItemSupplier {
            supplier,
            item,
            location: None,
            leadtime,
            size_minimum: 1.0,
            size_multiple: 0.0,
            cost: 0.0,
            effective: DateRange::default(),
            priority: 1,
        }
    }
}
