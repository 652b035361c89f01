use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use tracing::info;

use crate::schema::MessageRecord;

/// Name-substring predicate splitting authors into staff and community.
/// The marker list is deployment vocabulary, injected rather than inferred.
#[derive(Debug, Clone)]
pub struct StaffPredicate {
    markers: Vec<String>,
}

impl StaffPredicate {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn is_staff(&self, user: &str) -> bool {
        self.markers.iter().any(|marker| user.contains(marker))
    }
}

/// Ordered topic table for greedy first-match keyword classification.
/// An empty keyword list is the catch-all and absorbs anything unmatched.
#[derive(Debug, Clone)]
pub struct TopicTable {
    topics: Vec<(String, Vec<String>)>,
}

impl TopicTable {
    pub fn new(topics: Vec<(String, Vec<String>)>) -> Self {
        Self { topics }
    }

    /// The hand-maintained table from the production deployment.
    pub fn default_table() -> Self {
        let keywords = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self::new(vec![
            (
                "API Integration".to_string(),
                keywords(&["api", "integration", "endpoint", "webhook", "authenticate"]),
            ),
            (
                "Feature Requests".to_string(),
                keywords(&["feature", "request", "wish", "would like", "should add", "need"]),
            ),
            (
                "Bug Reports".to_string(),
                keywords(&["bug", "error", "issue", "not working", "broken", "problem"]),
            ),
            (
                "Template/Themes".to_string(),
                keywords(&["template", "theme", "design", "style", "customize", "branding"]),
            ),
            (
                "Images".to_string(),
                keywords(&["image", "photo", "picture", "upload", "unsplash", "visual"]),
            ),
            (
                "Pricing/Credits".to_string(),
                keywords(&["pricing", "credit", "plan", "subscription", "cost", "paid"]),
            ),
            ("General Discussion".to_string(), Vec::new()),
        ])
    }

    /// First topic whose keyword list matches the lowercased text; the
    /// catch-all wins when nothing else does.
    pub fn classify(&self, text: &str) -> &str {
        let content = text.to_lowercase();
        for (name, keywords) in &self.topics {
            if keywords.is_empty() {
                continue;
            }
            if keywords.iter().any(|kw| content.contains(kw.as_str())) {
                return name;
            }
        }
        self.topics
            .iter()
            .find(|(_, keywords)| keywords.is_empty())
            .map(|(name, _)| name.as_str())
            .unwrap_or("General Discussion")
    }

    fn names_in_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.topics.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: String,
    pub message_count: usize,
    pub percentage: u32,
    pub active_users: usize,
    pub thread_replies: usize,
    pub reaction_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStats {
    pub name: String,
    pub message_count: usize,
    pub percentage: u32,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementStats {
    pub total_reactions: u64,
    pub messages_with_reactions: usize,
    pub reaction_percentage: u32,
    pub top_level_messages: usize,
    pub thread_replies: usize,
    pub thread_percentage: u32,
    pub average_reactions_per_message: f64,
    /// (user, permalink, reaction count) of the most-reacted record.
    pub most_reacted: Option<(String, Option<String>, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub name: String,
    pub message_count: usize,
    pub percentage: u32,
    pub channel_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStats {
    pub community_questions: usize,
    pub questions_answered: usize,
    pub response_rate_percentage: u32,
    /// Averaged over answered questions only; None when nothing was answered.
    pub average_response_hours: Option<f64>,
}

/// Read-only aggregate over the full record set, computed once before any
/// LLM call. Used inside prompts and as deterministic fallback content.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total_records: usize,
    pub community_records: usize,
    pub staff_records: usize,
    pub community_percentage: u32,
    pub date_range: String,
    pub channels: Vec<ChannelStats>,
    pub topics: Vec<TopicStats>,
    pub engagement: EngagementStats,
    pub top_users: Vec<UserStats>,
    pub response: ResponseStats,
    pub staff_channels: Vec<ChannelStats>,
}

/// `round(100 * part / whole)`, short-circuiting whole = 0 to 0.
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        0
    } else {
        ((part as f64 / whole as f64) * 100.0).round() as u32
    }
}

pub fn analyze(
    records: &[MessageRecord],
    staff: &StaffPredicate,
    topics: &TopicTable,
) -> StatsSnapshot {
    let (staff_msgs, community): (Vec<&MessageRecord>, Vec<&MessageRecord>) =
        records.iter().partition(|msg| staff.is_staff(&msg.user));

    let snapshot = StatsSnapshot {
        total_records: records.len(),
        community_records: community.len(),
        staff_records: staff_msgs.len(),
        community_percentage: percentage(community.len(), records.len()),
        date_range: date_range(records),
        channels: channel_breakdown(&community),
        topics: topic_distribution(&community, topics),
        engagement: engagement_metrics(&community),
        top_users: user_participation(&community),
        response: response_coverage(&community, &staff_msgs),
        staff_channels: channel_breakdown(&staff_msgs),
    };

    info!(
        total = snapshot.total_records,
        community = snapshot.community_records,
        staff = snapshot.staff_records,
        channels = snapshot.channels.len(),
        "Computed statistics snapshot"
    );
    snapshot
}

fn date_range(records: &[MessageRecord]) -> String {
    let earliest = records.iter().map(|m| m.timestamp).min();
    let latest = records.iter().map(|m| m.timestamp).max();
    match (earliest, latest) {
        (Some(start), Some(end)) => format!(
            "{} to {}",
            start.format("%b %-d, %Y"),
            end.format("%b %-d, %Y")
        ),
        _ => "No data".to_string(),
    }
}

fn channel_breakdown(records: &[&MessageRecord]) -> Vec<ChannelStats> {
    struct Acc {
        count: usize,
        users: HashSet<String>,
        thread_replies: usize,
        reactions: u64,
    }

    let mut by_channel: BTreeMap<&str, Acc> = BTreeMap::new();
    for msg in records {
        let acc = by_channel.entry(msg.channel.as_str()).or_insert(Acc {
            count: 0,
            users: HashSet::new(),
            thread_replies: 0,
            reactions: 0,
        });
        acc.count += 1;
        acc.users.insert(msg.user.clone());
        acc.reactions += u64::from(msg.reaction_count);
        if msg.is_thread_reply {
            acc.thread_replies += 1;
        }
    }

    let total = records.len();
    let mut channels: Vec<ChannelStats> = by_channel
        .into_iter()
        .map(|(name, acc)| ChannelStats {
            name: name.to_string(),
            message_count: acc.count,
            percentage: percentage(acc.count, total),
            active_users: acc.users.len(),
            thread_replies: acc.thread_replies,
            reaction_count: acc.reactions,
        })
        .collect();
    channels.sort_by(|a, b| b.message_count.cmp(&a.message_count).then(a.name.cmp(&b.name)));
    channels
}

fn topic_distribution(records: &[&MessageRecord], table: &TopicTable) -> Vec<TopicStats> {
    let mut counts: BTreeMap<&str, (usize, HashSet<&str>)> = BTreeMap::new();
    for msg in records {
        let topic = table.classify(&msg.text);
        let entry = counts.entry(topic).or_default();
        entry.0 += 1;
        entry.1.insert(msg.channel.as_str());
    }

    let total = records.len();
    let mut topics: Vec<TopicStats> = table
        .names_in_order()
        .filter_map(|name| {
            counts.get(name).map(|(count, channels)| {
                let mut channels: Vec<String> =
                    channels.iter().map(|c| c.to_string()).collect();
                channels.sort();
                TopicStats {
                    name: name.to_string(),
                    message_count: *count,
                    percentage: percentage(*count, total),
                    channels,
                }
            })
        })
        .collect();
    topics.sort_by(|a, b| b.message_count.cmp(&a.message_count).then(a.name.cmp(&b.name)));
    topics
}

fn engagement_metrics(records: &[&MessageRecord]) -> EngagementStats {
    let mut total_reactions = 0u64;
    let mut messages_with_reactions = 0;
    let mut thread_replies = 0;
    let mut most_reacted: Option<&MessageRecord> = None;

    for msg in records {
        total_reactions += u64::from(msg.reaction_count);
        if msg.reaction_count > 0 {
            messages_with_reactions += 1;
        }
        if msg.is_thread_reply {
            thread_replies += 1;
        }
        if msg.reaction_count > most_reacted.map_or(0, |m| m.reaction_count) {
            most_reacted = Some(msg);
        }
    }

    let total = records.len();
    EngagementStats {
        total_reactions,
        messages_with_reactions,
        reaction_percentage: percentage(messages_with_reactions, total),
        top_level_messages: total - thread_replies,
        thread_replies,
        thread_percentage: percentage(thread_replies, total),
        average_reactions_per_message: if total == 0 {
            0.0
        } else {
            total_reactions as f64 / total as f64
        },
        most_reacted: most_reacted
            .map(|m| (m.user.clone(), m.permalink.clone(), m.reaction_count)),
    }
}

fn user_participation(records: &[&MessageRecord]) -> Vec<UserStats> {
    let mut by_user: BTreeMap<&str, (usize, HashSet<&str>)> = BTreeMap::new();
    for msg in records {
        let entry = by_user.entry(msg.user.as_str()).or_default();
        entry.0 += 1;
        entry.1.insert(msg.channel.as_str());
    }

    let total = records.len();
    let mut users: Vec<UserStats> = by_user
        .into_iter()
        .map(|(name, (count, channels))| UserStats {
            name: name.to_string(),
            message_count: count,
            percentage: percentage(count, total),
            channel_count: channels.len(),
        })
        .collect();
    users.sort_by(|a, b| b.message_count.cmp(&a.message_count).then(a.name.cmp(&b.name)));
    users.truncate(5);
    users
}

/// Best-effort coverage heuristic: a community record containing a question
/// mark is a question; it counts as answered iff some staff record in the
/// same channel has a strictly later timestamp. Response time is measured
/// against the first such staff record in input order.
fn response_coverage(
    community: &[&MessageRecord],
    staff: &[&MessageRecord],
) -> ResponseStats {
    let questions: Vec<&&MessageRecord> =
        community.iter().filter(|msg| msg.text.contains('?')).collect();

    let mut answered = 0;
    let mut total_hours = 0.0;
    for question in &questions {
        let response = staff.iter().find(|reply| {
            reply.channel == question.channel && reply.timestamp > question.timestamp
        });
        if let Some(reply) = response {
            answered += 1;
            let delta = reply.timestamp - question.timestamp;
            total_hours += delta.num_seconds() as f64 / 3600.0;
        }
    }

    ResponseStats {
        community_questions: questions.len(),
        questions_answered: answered,
        response_rate_percentage: percentage(answered, questions.len()),
        average_response_hours: if answered > 0 {
            Some(total_hours / answered as f64)
        } else {
            None
        },
    }
}

impl StatsSnapshot {
    /// Pre-calculated statistics block threaded into prompts and into the
    /// final report header.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();

        out.push_str("### Message Overview\n");
        let _ = writeln!(out, "- **Total Community Messages**: {}", self.community_records);
        let _ = writeln!(out, "- **Total Staff Messages**: {}", self.staff_records);
        let _ = writeln!(out, "- **Total Workspace Messages**: {}", self.total_records);
        let _ = writeln!(out, "- **Community %**: {}%", self.community_percentage);
        let _ = writeln!(out, "- **Time Period**: {}", self.date_range);

        out.push_str("\n### Channel Breakdown (Community)\n");
        for ch in &self.channels {
            let _ = writeln!(
                out,
                "- **{}**: {} msgs ({}%), {} users, {} thread replies, {} reactions",
                ch.name, ch.message_count, ch.percentage, ch.active_users,
                ch.thread_replies, ch.reaction_count
            );
        }

        out.push_str("\n### Topic Distribution (Community)\n");
        for topic in &self.topics {
            let _ = writeln!(
                out,
                "- **{}**: {} msgs ({}%) across channels: {}",
                topic.name,
                topic.message_count,
                topic.percentage,
                topic.channels.join(", ")
            );
        }

        out.push_str("\n### Engagement Metrics (Community)\n");
        let eng = &self.engagement;
        let _ = writeln!(out, "- **Total Reactions**: {}", eng.total_reactions);
        let _ = writeln!(
            out,
            "- **Messages with Reactions**: {} ({}%)",
            eng.messages_with_reactions, eng.reaction_percentage
        );
        let _ = writeln!(
            out,
            "- **Average Reactions/Message**: {:.2}",
            eng.average_reactions_per_message
        );
        let _ = writeln!(
            out,
            "- **Thread Replies**: {} ({}%)",
            eng.thread_replies, eng.thread_percentage
        );
        if let Some((user, permalink, reactions)) = &eng.most_reacted {
            match permalink {
                Some(url) => {
                    let _ = writeln!(out, "- **Most Reacted**: [{user}]({url}) with {reactions} reactions");
                }
                None => {
                    let _ = writeln!(out, "- **Most Reacted**: {user} with {reactions} reactions");
                }
            }
        }

        out.push_str("\n### User Participation (Community)\n");
        for user in &self.top_users {
            let _ = writeln!(
                out,
                "- {}: {} msgs ({}%) in {} channels",
                user.name, user.message_count, user.percentage, user.channel_count
            );
        }

        out.push_str("\n### Staff Response Metrics\n");
        let resp = &self.response;
        let _ = writeln!(out, "- **Community Questions**: {}", resp.community_questions);
        let _ = writeln!(
            out,
            "- **Questions Answered by Staff**: {} ({}% response rate)",
            resp.questions_answered, resp.response_rate_percentage
        );
        if let Some(hours) = resp.average_response_hours {
            let _ = writeln!(out, "- **Average Response Time**: {hours:.1} hours");
        }

        if !self.staff_channels.is_empty() {
            out.push_str("\n### Staff Channel Activity\n");
            for ch in &self.staff_channels {
                let _ = writeln!(
                    out,
                    "- **{}**: {} msgs ({}% of staff activity)",
                    ch.name, ch.message_count, ch.percentage
                );
            }
        }

        out
    }
}
