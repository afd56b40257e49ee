use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Optional detail fields a place page may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Address,
    Phone,
    Website,
    #[serde(alias = "type")]
    Category,
    Rating,
    #[serde(alias = "reviews_count")]
    ReviewCount,
    PriceLevel,
    OpeningHours,
    ImageUrl,
    Description,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Address,
        Field::Phone,
        Field::Website,
        Field::Category,
        Field::Rating,
        Field::ReviewCount,
        Field::PriceLevel,
        Field::OpeningHours,
        Field::ImageUrl,
        Field::Description,
    ];

    /// Fields whose total absence suggests the detail view had not finished rendering.
    pub const CONTACT: [Field; 3] = [Field::Address, Field::Phone, Field::Website];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Address => "address",
            Field::Phone => "phone",
            Field::Website => "website",
            Field::Category => "category",
            Field::Rating => "rating",
            Field::ReviewCount => "review_count",
            Field::PriceLevel => "price_level",
            Field::OpeningHours => "opening_hours",
            Field::ImageUrl => "image_url",
            Field::Description => "description",
        }
    }
}

/// One extracted saved place. Absent fields are omitted when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(
        default,
        alias = "reviews_count",
        alias = "reviewCount",
        skip_serializing_if = "Option::is_none"
    )]
    pub review_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    #[serde(default, alias = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub scraped_at: DateTime<Local>,
}

impl PlaceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self::at(name, Local::now())
    }

    pub fn at(name: impl Into<String>, scraped_at: DateTime<Local>) -> Self {
        PlaceRecord {
            name: name.into(),
            address: None,
            phone: None,
            website: None,
            category: None,
            rating: None,
            review_count: None,
            price_level: None,
            opening_hours: None,
            image_url: None,
            description: None,
            scraped_at,
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.slot(field).as_deref()
    }

    /// Store a value; blank values leave the field absent.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        *self.slot_mut(field) = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }

    pub fn has_contact(&self) -> bool {
        Field::CONTACT.iter().any(|f| self.get(*f).is_some())
    }

    pub fn populated(&self) -> usize {
        Field::ALL.iter().filter(|f| self.get(**f).is_some()).count()
    }

    /// Collapse blank strings (older stores wrote "" for missing values).
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        for field in Field::ALL {
            let value = self.slot_mut(field).take();
            self.set(field, value);
        }
    }

    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::Address => &self.address,
            Field::Phone => &self.phone,
            Field::Website => &self.website,
            Field::Category => &self.category,
            Field::Rating => &self.rating,
            Field::ReviewCount => &self.review_count,
            Field::PriceLevel => &self.price_level,
            Field::OpeningHours => &self.opening_hours,
            Field::ImageUrl => &self.image_url,
            Field::Description => &self.description,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Address => &mut self.address,
            Field::Phone => &mut self.phone,
            Field::Website => &mut self.website,
            Field::Category => &mut self.category,
            Field::Rating => &mut self.rating,
            Field::ReviewCount => &mut self.review_count,
            Field::PriceLevel => &mut self.price_level,
            Field::OpeningHours => &mut self.opening_hours,
            Field::ImageUrl => &mut self.image_url,
            Field::Description => &mut self.description,
        }
    }
}
