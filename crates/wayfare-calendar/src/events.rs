//! Converting trip items into calendar events.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use wayfare_core::{Destination, Flight, FlightLeg, Hotel, Trip};

use crate::error::CalendarError;
use crate::types::CalendarEvent;

const RESTAURANT_DURATION_HOURS: i64 = 2;

/// Restaurant booking to put on the calendar.
#[derive(Debug, Clone)]
pub struct RestaurantReservation {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub address: String,
    pub trip_title: Option<String>,
}

fn at(date: NaiveDate, h: u32, m: u32, s: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(h, m, s).unwrap_or(NaiveTime::MIN))
}

fn parse_leg(leg: &FlightLeg) -> Result<NaiveDateTime, CalendarError> {
    let date = NaiveDate::parse_from_str(&leg.date, "%Y-%m-%d").map_err(|e| {
        CalendarError::InvalidEventData(format!("bad flight date '{}': {}", leg.date, e))
    })?;
    let time = NaiveTime::parse_from_str(&leg.time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&leg.time, "%H:%M:%S"))
        .map_err(|e| {
            CalendarError::InvalidEventData(format!("bad flight time '{}': {}", leg.time, e))
        })?;
    Ok(date.and_time(time))
}

pub fn flight_event(flight: &Flight) -> Result<CalendarEvent, CalendarError> {
    let start = parse_leg(&flight.departure)?;
    let end = parse_leg(&flight.arrival)?;

    Ok(CalendarEvent {
        id: format!("flight-{}", flight.id),
        title: format!("✈️ Flight: {} {}", flight.airline, flight.flight_number),
        start,
        end,
        description: format!(
            "Departure: {} at {}\nArrival: {} at {}\nDuration: {}\nClass: {}",
            flight.departure.airport,
            flight.departure.time,
            flight.arrival.airport,
            flight.arrival.time,
            flight.duration,
            flight.class.as_str()
        ),
        location: Some(format!(
            "{} → {}",
            flight.departure.airport, flight.arrival.airport
        )),
    })
}

/// Hotel stay: check-in 15:00 on the first day, check-out 11:00 on the last.
pub fn hotel_event(hotel: &Hotel, trip: &Trip) -> CalendarEvent {
    CalendarEvent {
        id: format!("hotel-{}", hotel.id),
        title: format!("🏨 Hotel: {}", hotel.name),
        start: at(trip.start_date, 15, 0, 0),
        end: at(trip.end_date, 11, 0, 0),
        description: format!(
            "Check-in: {}\nCheck-out: {}\nLocation: {}\nRating: {}/5\nPrice: ${}",
            trip.start_date, trip.end_date, hotel.location, hotel.rating, hotel.price
        ),
        location: Some(hotel.location.clone()),
    }
}

pub fn destination_event(destination: &Destination, trip: &Trip) -> CalendarEvent {
    CalendarEvent {
        id: format!("destination-{}", destination.id),
        title: format!("📍 Visit: {}", destination.name),
        start: at(trip.start_date, 9, 0, 0),
        end: at(trip.end_date, 18, 0, 0),
        description: format!(
            "{}\nRating: {}/5\nCategory: {}",
            destination.description,
            destination.rating,
            destination.category.as_str()
        ),
        location: Some(format!(
            "{}, {}",
            destination.location.latitude, destination.location.longitude
        )),
    }
}

/// Whole-trip event spanning the first to the last day.
pub fn summary_event(trip: &Trip) -> CalendarEvent {
    let names: Vec<&str> = trip.destinations.iter().map(|d| d.name.as_str()).collect();

    CalendarEvent {
        id: format!("trip-{}", trip.id),
        title: format!("🌍 Trip: {}", trip.title),
        start: at(trip.start_date, 0, 0, 0),
        end: at(trip.end_date, 23, 59, 59),
        description: format!(
            "{}\nBudget: ${}\nDestinations: {}\nFlights: {}\nHotels: {}",
            trip.description,
            trip.budget,
            trip.destinations.len(),
            trip.flights.len(),
            trip.hotels.len()
        ),
        location: Some(names.join(", ")),
    }
}

/// All events for a trip in creation order: flights, hotels, destinations,
/// then the summary.
pub fn trip_events(trip: &Trip) -> Result<Vec<CalendarEvent>, CalendarError> {
    let mut events =
        Vec::with_capacity(trip.flights.len() + trip.hotels.len() + trip.destinations.len() + 1);

    for flight in &trip.flights {
        events.push(flight_event(flight)?);
    }
    events.extend(trip.hotels.iter().map(|h| hotel_event(h, trip)));
    events.extend(trip.destinations.iter().map(|d| destination_event(d, trip)));
    events.push(summary_event(trip));

    Ok(events)
}

/// Two-hour dinner event. `id_suffix` disambiguates the client id.
pub fn restaurant_event(reservation: &RestaurantReservation, id_suffix: i64) -> CalendarEvent {
    let start = reservation.date.and_time(reservation.time);
    let end = start + Duration::hours(RESTAURANT_DURATION_HOURS);

    let mut description = format!(
        "Dinner at {}\nAddress: {}",
        reservation.name, reservation.address
    );
    if let Some(title) = &reservation.trip_title {
        description.push_str(&format!("\nPart of trip: {}", title));
    }

    CalendarEvent {
        id: format!("restaurant-{}", id_suffix),
        title: format!("🍽️ Restaurant: {}", reservation.name),
        start,
        end,
        description,
        location: Some(reservation.address.clone()),
    }
}
