use std::rc::Rc;

use glam::DVec3;

/// Polyline of nodes relative to wherever a follower starts it.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    name: String,
    nodes: Vec<DVec3>,
    length: f64,
}

impl Path {
    pub fn new(name: impl Into<String>, nodes: Vec<DVec3>) -> Self {
        let length = nodes.windows(2).map(|w| w[0].distance(w[1])).sum();
        Self {
            name: name.into(),
            nodes,
            length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[DVec3] {
        &self.nodes
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Point `distance` units along the path, clamped to its ends.
    pub fn point_at(&self, distance: f64) -> DVec3 {
        let Some(first) = self.nodes.first() else {
            return DVec3::ZERO;
        };
        let mut left = distance.max(0.0);
        for w in self.nodes.windows(2) {
            let segment = w[0].distance(w[1]);
            if left <= segment {
                if segment == 0.0 {
                    return w[0];
                }
                return w[0].lerp(w[1], left / segment);
            }
            left -= segment;
        }
        self.nodes.last().copied().unwrap_or(*first)
    }
}

/// What a follower does when it runs off either end of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathEnd {
    #[default]
    Stop,
    Restart,
    Continue,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep {
    pub position: DVec3,
    pub reached_end: bool,
    pub is_finished: bool,
}

/// Moves an instance along a [`Path`] at a signed speed per step.
#[derive(Debug, Clone)]
pub struct PathFollower {
    path: Rc<Path>,
    speed: f64,
    end: PathEnd,
    is_pausable: bool,
    distance: f64,
    anchor: DVec3,
    is_finished: bool,
}

impl PathFollower {
    pub fn new(path: Rc<Path>, speed: f64, end: PathEnd) -> Self {
        let distance = if speed < 0.0 { path.length() } else { 0.0 };
        Self {
            path,
            speed,
            end,
            is_pausable: true,
            distance,
            anchor: DVec3::ZERO,
            is_finished: false,
        }
    }

    pub fn with_pausable(mut self, is_pausable: bool) -> Self {
        self.is_pausable = is_pausable;
        self
    }

    pub fn path(&self) -> &Rc<Path> {
        &self.path
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn end_action(&self) -> PathEnd {
        self.end
    }

    pub fn is_pausable(&self) -> bool {
        self.is_pausable
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn position(&self) -> DVec3 {
        self.anchor + self.path.point_at(self.distance)
    }

    /// Places the path so that the follower's current point is at `position`.
    pub(crate) fn anchor(&mut self, position: DVec3) {
        self.anchor = position - self.path.point_at(self.distance);
    }

    pub fn step(&mut self) -> PathStep {
        if self.is_finished {
            return PathStep {
                position: self.position(),
                reached_end: false,
                is_finished: true,
            };
        }

        let length = self.path.length();
        self.distance += self.speed;
        let overshoot = if self.distance > length {
            Some(self.distance - length)
        } else if self.distance < 0.0 {
            Some(self.distance)
        } else {
            None
        };

        let reached_end = match overshoot {
            None => false,
            Some(over) => {
                let forward = over > 0.0;
                match self.end {
                    PathEnd::Stop => {
                        self.distance = self.distance.clamp(0.0, length);
                        self.is_finished = true;
                    }
                    PathEnd::Restart => {
                        self.distance = if forward { 0.0 } else { length };
                    }
                    PathEnd::Continue => {
                        let span = self.path.point_at(length) - self.path.point_at(0.0);
                        if forward {
                            self.anchor += span;
                            self.distance = over.min(length);
                        } else {
                            self.anchor -= span;
                            self.distance = (length + over).max(0.0);
                        }
                    }
                    PathEnd::Reverse => {
                        self.speed = -self.speed;
                        self.distance = self.distance.clamp(0.0, length);
                    }
                }
                true
            }
        };

        PathStep {
            position: self.position(),
            reached_end,
            is_finished: self.is_finished,
        }
    }
}
