//! HTML parsing strategies for the stats site.
//!
//! Each resource kind maps to one parsing function through [`STRATEGIES`]. Rows
//! that cannot be parsed are skipped with a warning; a page without the table
//! we expect is a parse error, since that means the site layout changed.

use crate::error::FetchError;
use crate::models::*;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Context needed to turn site-local values into absolute ones
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    /// Timezone game times are published in
    pub timezone: Tz,
    /// Local date used to infer the year of "Wed Sep 10" style dates
    pub today: NaiveDate,
}

impl ParseContext {
    pub fn now_in(timezone: Tz) -> Self {
        Self { timezone, today: Utc::now().with_timezone(&timezone).date_naive() }
    }
}

pub type ParseStrategy = fn(&Html, &ParseContext) -> Result<StructuredData, String>;

/// Parsing strategy lookup table
pub const STRATEGIES: [(ResourceKind, ParseStrategy); 4] = [
    (ResourceKind::TeamList, parse_team_list as ParseStrategy),
    (ResourceKind::Schedule, parse_schedule as ParseStrategy),
    (ResourceKind::LockerRoom, parse_locker_rooms as ParseStrategy),
    (ResourceKind::PlayerStats, parse_player_stats as ParseStrategy),
];

pub fn strategy_for(kind: ResourceKind) -> Option<ParseStrategy> {
    STRATEGIES.iter().find(|(k, _)| *k == kind).map(|(_, strategy)| *strategy)
}

/// Parse a fetched page into the structured payload for `descriptor`
pub fn parse_document(
    descriptor: &ResourceDescriptor,
    body: &str,
    ctx: &ParseContext,
) -> Result<StructuredData, FetchError> {
    let strategy = strategy_for(descriptor.kind()).ok_or_else(|| {
        FetchError::parse(descriptor.cache_key(), "no parsing strategy registered")
    })?;

    let document = Html::parse_document(body);
    strategy(&document, ctx).map_err(|message| FetchError::parse(descriptor.cache_key(), message))
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("Failed to create selector '{css}': {e:?}"))
}

fn cell_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn query_param<'a>(href: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = href.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn parse_count(text: &str) -> u32 {
    text.trim().parse().unwrap_or(0)
}

fn parse_optional_count(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        text.parse().ok()
    }
}

/// Find an integer query parameter on any link inside `cell`
fn link_id(cell: &ElementRef, links: &Selector, key: &str) -> Option<i64> {
    cell.select(links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| query_param(href, key))
        .find_map(|id| id.parse().ok())
}

fn digits_id(cell: &ElementRef) -> Option<i64> {
    let text = cell_text(cell);
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Team list
// ---------------------------------------------------------------------------

fn division_text(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty() && text.contains("Division")).then(|| text.to_string())
}

/// Find the division heading that precedes a standings table
fn find_division_name(table: &ElementRef, header: &Selector) -> Option<String> {
    let from_node = |node| -> Option<String> {
        if let Some(element) = ElementRef::wrap(node) {
            division_text(&cell_text(&element))
        } else {
            node.value().as_text().and_then(|text| division_text(text))
        }
    };

    if let Some(name) = table.prev_siblings().take(10).find_map(from_node) {
        return Some(name);
    }

    if let Some(parent) = table.parent() {
        if let Some(name) = parent.prev_siblings().take(5).find_map(from_node) {
            return Some(name);
        }
    }

    // Some seasons put the division in the table's own header row
    table.select(header).next().and_then(|th| division_text(&cell_text(&th)))
}

fn parse_team_list(document: &Html, _ctx: &ParseContext) -> Result<StructuredData, String> {
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let header_sel = selector("th")?;
    let link_sel = selector("a")?;

    let tables: Vec<ElementRef> = document.select(&table_sel).collect();
    if tables.is_empty() {
        return Err("no standings tables found".to_string());
    }

    let mut teams = Vec::new();
    for table in tables {
        let Some(division) = find_division_name(&table, &header_sel) else {
            debug!("Skipping table without a division heading");
            continue;
        };

        for row in table.select(&row_sel) {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
            if cells.len() < 8 {
                continue;
            }

            let Some(link) = cells[0].select(&link_sel).next() else {
                continue;
            };
            let name = cell_text(&link);
            let Some(id) = link
                .value()
                .attr("href")
                .and_then(|href| query_param(href, "team"))
                .and_then(|id| id.parse::<i64>().ok())
            else {
                warn!("Could not extract team ID for {}", name);
                continue;
            };

            let streak = cell_text(&cells[7]);
            teams.push(Team {
                id,
                name,
                division: division.clone(),
                record: TeamRecord {
                    games_played: parse_count(&cell_text(&cells[1])),
                    wins: parse_count(&cell_text(&cells[2])),
                    losses: parse_count(&cell_text(&cells[3])),
                    ties: parse_count(&cell_text(&cells[4])),
                    overtime_losses: parse_count(&cell_text(&cells[5])),
                    points: parse_count(&cell_text(&cells[6])),
                    streak: (!streak.is_empty()).then_some(streak),
                },
            });
        }
    }

    if teams.is_empty() {
        return Err("standings tables contained no team rows".to_string());
    }

    debug!("Parsed {} teams", teams.len());
    Ok(StructuredData::Teams(teams))
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Turn "Wed Sep 10" + "9:45 PM" (league-local, no year) into a UTC instant.
///
/// The year is the one nearest to `ctx.today` whose weekday matches.
pub fn parse_game_time(
    date_str: &str,
    time_str: &str,
    ctx: &ParseContext,
) -> Result<DateTime<Utc>, String> {
    let time_str = time_str.trim();
    let time = NaiveTime::parse_from_str(time_str, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(time_str, "%H:%M"))
        .map_err(|_| format!("invalid game time '{time_str}'"))?;

    let date_str = date_str.trim();
    let date = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            let year = ctx.today.year();
            [year - 1, year, year + 1]
                .iter()
                .filter_map(|y| {
                    NaiveDate::parse_from_str(&format!("{date_str} {y}"), "%a %b %d %Y").ok()
                })
                .min_by_key(|d| (*d - ctx.today).num_days().abs())
                .ok_or_else(|| format!("invalid game date '{date_str}'"))?
        }
    };

    ctx.timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("nonexistent local time {date_str} {time_str}"))
}

fn extract_game_id(cells: &[ElementRef], links: &Selector) -> Option<i64> {
    for index in [12, 11] {
        if let Some(cell) = cells.get(index) {
            if let Some(id) = link_id(cell, links, "game_id").or_else(|| digits_id(cell)) {
                return Some(id);
            }
        }
    }
    cells.first().and_then(digits_id)
}

fn parse_schedule_row(
    cells: &[ElementRef],
    links: &Selector,
    ctx: &ParseContext,
) -> Result<Game, String> {
    let id = extract_game_id(cells, links).ok_or("missing game id")?;
    let scheduled_time = parse_game_time(&cell_text(&cells[1]), &cell_text(&cells[2]), ctx)?;

    let away_goals = parse_optional_count(&cell_text(&cells[7]));
    let home_goals = parse_optional_count(&cell_text(&cells[9]));
    let status = if away_goals.is_some() && home_goals.is_some() {
        GameStatus::Completed
    } else {
        GameStatus::Scheduled
    };

    Ok(Game {
        id,
        scheduled_time,
        rink: cell_text(&cells[3]),
        league: cell_text(&cells[4]),
        level: cell_text(&cells[5]),
        away_team: cell_text(&cells[6]),
        away_goals,
        home_team: cell_text(&cells[8]),
        home_goals,
        game_type: cell_text(&cells[10]),
        status,
    })
}

fn parse_schedule(document: &Html, ctx: &ParseContext) -> Result<StructuredData, String> {
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let link_sel = selector("a")?;

    let tables: Vec<ElementRef> = document.select(&table_sel).collect();
    if tables.is_empty() {
        return Err("no schedule table found".to_string());
    }

    let mut games = Vec::new();
    for table in tables {
        for row in table.select(&row_sel) {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
            if cells.len() < 12 {
                continue;
            }

            match parse_schedule_row(&cells, &link_sel, ctx) {
                Ok(game) => games.push(game),
                Err(e) => warn!("Failed to parse game row: {}", e),
            }
        }
    }

    debug!("Parsed {} games", games.len());
    Ok(StructuredData::Schedule(games))
}

// ---------------------------------------------------------------------------
// Locker rooms
// ---------------------------------------------------------------------------

fn parse_locker_rooms(document: &Html, _ctx: &ParseContext) -> Result<StructuredData, String> {
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let link_sel = selector("a")?;

    let table = document.select(&table_sel).next().ok_or("no locker room table found")?;

    let mut assignments = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.len() < 4 {
            continue;
        }

        let Some(game_id) = link_id(&cells[0], &link_sel, "game_id").or_else(|| digits_id(&cells[0]))
        else {
            warn!("Skipping locker room row without a game id");
            continue;
        };

        let label = cell_text(&cells[3]);
        if label.is_empty() {
            // Not assigned yet
            continue;
        }

        assignments.push(LockerRoomAssignment {
            game_id,
            rink: cell_text(&cells[1]),
            team: cell_text(&cells[2]),
            label,
        });
    }

    Ok(StructuredData::LockerRooms(assignments))
}

// ---------------------------------------------------------------------------
// Player stats
// ---------------------------------------------------------------------------

fn parse_player_stats(document: &Html, _ctx: &ParseContext) -> Result<StructuredData, String> {
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let header_sel = selector("th, td")?;
    let cell_sel = selector("td")?;

    for table in document.select(&table_sel) {
        let mut rows = table.select(&row_sel);
        let Some(header_row) = rows.next() else {
            continue;
        };

        let columns: HashMap<String, usize> = header_row
            .select(&header_sel)
            .enumerate()
            .map(|(i, cell)| (cell_text(&cell).to_ascii_lowercase(), i))
            .collect();

        let Some(&name_col) = columns.get("name") else {
            continue;
        };
        let column = |keys: &[&str]| keys.iter().find_map(|k| columns.get(*k).copied());
        let number_col = column(&["#", "no", "no."]);
        let gp_col = column(&["gp"]);
        let goals_col = column(&["goals", "g"]);
        let assists_col = column(&["ass.", "assists", "a"]);
        let points_col = column(&["pts", "points", "p"]);
        let pim_col = column(&["pim"]);

        let mut players = Vec::new();
        for row in rows {
            let cells: Vec<String> = row.select(&cell_sel).map(|c| cell_text(&c)).collect();
            let Some(name) = cells.get(name_col).filter(|n| !n.is_empty()) else {
                continue;
            };
            let count = |col: Option<usize>| {
                col.and_then(|i| cells.get(i)).map(|v| parse_count(v)).unwrap_or(0)
            };

            players.push(PlayerStat {
                name: name.clone(),
                number: number_col.and_then(|i| cells.get(i)).filter(|n| !n.is_empty()).cloned(),
                games_played: count(gp_col),
                goals: count(goals_col),
                assists: count(assists_col),
                points: count(points_col),
                penalty_minutes: count(pim_col),
            });
        }

        return Ok(StructuredData::PlayerStats(players));
    }

    Err("no player stats table found".to_string())
}
