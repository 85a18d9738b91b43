pub const STARTING_LIFE: i32 = 20;
pub const LETHAL_POISON: u32 = 10;
pub const PLAYER_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub name: String,
    pub life: i32,
    pub commander_damage: u32,
    pub poison: u32,
}

impl Player {
    fn new(seat: usize) -> Self {
        Self {
            name: format!("Player {}", seat + 1),
            life: STARTING_LIFE,
            commander_damage: 0,
            poison: 0,
        }
    }

    pub fn is_eliminated(&self) -> bool {
        self.life <= 0 || self.poison >= LETHAL_POISON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Life,
    CommanderDamage,
    Poison,
}

/// Shared-screen life tracker for a four player table.
#[derive(Debug, Clone, PartialEq)]
pub struct LifeCounter {
    players: Vec<Player>,
}

impl Default for LifeCounter {
    fn default() -> Self {
        Self {
            players: (0..PLAYER_COUNT).map(Player::new).collect(),
        }
    }
}

impl LifeCounter {
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Moves one counter of `seat` by `delta`. Damage and poison stop at zero.
    pub fn adjust(&mut self, seat: usize, counter: Counter, delta: i32) {
        let Some(player) = self.players.get_mut(seat) else {
            return;
        };
        match counter {
            Counter::Life => player.life += delta,
            Counter::CommanderDamage => {
                player.commander_damage = player.commander_damage.saturating_add_signed(delta)
            }
            Counter::Poison => player.poison = player.poison.saturating_add_signed(delta),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
