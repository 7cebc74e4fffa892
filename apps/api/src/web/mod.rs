//! Outbound web services: search, page reading, geocoding and routing.

pub mod geo;
pub mod reader;
pub mod search;

pub use geo::{Geocoder, LatLng, RouteClient};
pub use reader::PageReader;
pub use search::{SearchHit, YouSearchClient};
