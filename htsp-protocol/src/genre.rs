//! DVB content genre names.
//!
//! The content descriptor byte of an EPG event splits into a content
//! nibble (upper four bits, the broad group) and a user nibble (the
//! specific subtype). Names follow ETSI EN 300 468, table 28.
//!
//! ```
//! use htsp_protocol::genre::genre_name;
//!
//! assert_eq!(genre_name(0x24), Some("Discussion/Interview/Debate"));
//! // unknown subtype falls back to its group
//! assert_eq!(genre_name(0x2F), Some("News/Current Affairs"));
//! assert_eq!(genre_name(0x00), None);
//! ```

/// Name of the broad group encoded in the upper nibble.
pub fn genre_group(content_type: u8) -> Option<&'static str> {
    match content_type >> 4 {
        0x1 => Some("Movie/Drama"),
        0x2 => Some("News/Current Affairs"),
        0x3 => Some("Show/Game Show"),
        0x4 => Some("Sports"),
        0x5 => Some("Children's/Youth Programmes"),
        0x6 => Some("Music/Ballet/Dance"),
        0x7 => Some("Arts/Culture (without music)"),
        0x8 => Some("Social/Political Issues/Economics"),
        0x9 => Some("Education/Science/Factual Topics"),
        0xA => Some("Leisure Hobbies"),
        0xB => Some("Special Characteristics"),
        _ => None,
    }
}

/// Name of the specific subtype, if the full byte is a defined one.
pub fn genre_subtype(content_type: u8) -> Option<&'static str> {
    let name = match content_type {
        // Movie/Drama
        0x10 => "Movie/Drama",
        0x11 => "Detective/Thriller",
        0x12 => "Adventure/Western/War",
        0x13 => "Science Fiction/Fantasy/Horror",
        0x14 => "Comedy",
        0x15 => "Soap/Melodrama/Folklore",
        0x16 => "Romance",
        0x17 => "Serious/Classical/Religious/Historical Movie/Drama",
        0x18 => "Adult Movie/Drama",

        // News/Current Affairs
        0x20 => "News/Current Affairs",
        0x21 => "News/Weather Report",
        0x22 => "News Magazine",
        0x23 => "Documentary",
        0x24 => "Discussion/Interview/Debate",

        // Show/Game Show
        0x30 => "Show/Game Show",
        0x31 => "Game Show/Quiz/Contest",
        0x32 => "Variety Show",
        0x33 => "Talk Show",

        // Sports
        0x40 => "Sports",
        0x41 => "Special Event",
        0x42 => "Sport Magazine",
        0x43 => "Football",
        0x44 => "Tennis/Squash",
        0x45 => "Team Sports",
        0x46 => "Athletics",
        0x47 => "Motor Sport",
        0x48 => "Water Sport",
        0x49 => "Winter Sports",
        0x4A => "Equestrian",
        0x4B => "Martial Sports",

        // Children's/Youth
        0x50 => "Children's/Youth Programmes",
        0x51 => "Pre-school Children's Programmes",
        0x52 => "Entertainment Programmes for 6 to 14",
        0x53 => "Entertainment Programmes for 10 to 16",
        0x54 => "Informational/Educational/School Programme",
        0x55 => "Cartoons/Puppets",

        // Music/Ballet/Dance
        0x60 => "Music/Ballet/Dance",
        0x61 => "Rock/Pop",
        0x62 => "Serious/Classical Music",
        0x63 => "Folk/Traditional Music",
        0x64 => "Jazz",
        0x65 => "Musical/Opera",
        0x66 => "Ballet",

        // Arts/Culture
        0x70 => "Arts/Culture (without music)",
        0x71 => "Performing Arts",
        0x72 => "Fine Arts",
        0x73 => "Religion",
        0x74 => "Popular Culture/Traditional Arts",
        0x75 => "Literature",
        0x76 => "Film/Cinema",
        0x77 => "Experimental Film/Video",
        0x78 => "Broadcasting/Press",
        0x79 => "New Media",
        0x7A => "Arts/Culture Magazines",
        0x7B => "Fashion",

        // Social/Political/Economics
        0x80 => "Social/Political Issues/Economics",
        0x81 => "Magazines/Reports/Documentary",
        0x82 => "Economics/Social Advisory",
        0x83 => "Remarkable People",

        // Education/Science
        0x90 => "Education/Science/Factual Topics",
        0x91 => "Nature/Animals/Environment",
        0x92 => "Technology/Natural Sciences",
        0x93 => "Medicine/Physiology/Psychology",
        0x94 => "Foreign Countries/Expeditions",
        0x95 => "Social/Spiritual Sciences",
        0x96 => "Further Education",
        0x97 => "Languages",

        // Leisure
        0xA0 => "Leisure Hobbies",
        0xA1 => "Tourism/Travel",
        0xA2 => "Handicraft",
        0xA3 => "Motoring",
        0xA4 => "Fitness and Health",
        0xA5 => "Cooking",
        0xA6 => "Advertisement/Shopping",
        0xA7 => "Gardening",

        // Special characteristics
        0xB0 => "Original Language",
        0xB1 => "Black and White",
        0xB2 => "Unpublished",
        0xB3 => "Live Broadcast",

        _ => return None,
    };
    Some(name)
}

/// Subtype name, falling back to the group name for undefined subtypes.
pub fn genre_name(content_type: u8) -> Option<&'static str> {
    genre_subtype(content_type).or_else(|| genre_group(content_type))
}
